use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// cadence of rest and compounding boundaries during recalculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecalculationFrequency {
    /// boundaries fall on installment due dates
    SameAsRepayment,
    Daily,
    Weekly,
    Monthly,
}

impl RecalculationFrequency {
    /// first boundary on or after `date`, counted from `anchor`
    ///
    /// returns None for `SameAsRepayment`, whose boundaries are the
    /// schedule's own due dates.
    pub fn next_boundary(&self, anchor: NaiveDate, date: NaiveDate) -> Option<NaiveDate> {
        if date <= anchor {
            return match self {
                RecalculationFrequency::SameAsRepayment => None,
                _ => Some(anchor),
            };
        }
        match self {
            RecalculationFrequency::SameAsRepayment => None,
            RecalculationFrequency::Daily => Some(date),
            RecalculationFrequency::Weekly => {
                let days = (date - anchor).num_days();
                let weeks = (days + 6) / 7;
                anchor.checked_add_signed(chrono::Duration::days(weeks * 7))
            }
            RecalculationFrequency::Monthly => {
                let mut months = 0u32;
                loop {
                    let boundary = anchor.checked_add_months(Months::new(months))?;
                    if boundary >= date {
                        return Some(boundary);
                    }
                    months += 1;
                }
            }
        }
    }
}

/// which overdue amounts fold into the interest base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompoundingKind {
    None,
    Interest,
    Fee,
    InterestAndFee,
}

impl CompoundingKind {
    pub fn compounds_interest(&self) -> bool {
        matches!(self, CompoundingKind::Interest | CompoundingKind::InterestAndFee)
    }

    pub fn compounds_fees(&self) -> bool {
        matches!(self, CompoundingKind::Fee | CompoundingKind::InterestAndFee)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundingPolicy {
    pub kind: CompoundingKind,
    pub frequency: RecalculationFrequency,
}

impl Default for CompoundingPolicy {
    fn default() -> Self {
        Self {
            kind: CompoundingKind::None,
            frequency: RecalculationFrequency::SameAsRepayment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekly_boundaries_from_anchor() {
        let anchor = date(2024, 1, 1);
        let weekly = RecalculationFrequency::Weekly;
        assert_eq!(weekly.next_boundary(anchor, date(2024, 1, 8)), Some(date(2024, 1, 8)));
        assert_eq!(weekly.next_boundary(anchor, date(2024, 1, 9)), Some(date(2024, 1, 15)));
        assert_eq!(weekly.next_boundary(anchor, date(2023, 12, 1)), Some(anchor));
    }

    #[test]
    fn test_monthly_boundaries_keep_day_of_month() {
        let anchor = date(2024, 1, 15);
        let monthly = RecalculationFrequency::Monthly;
        assert_eq!(monthly.next_boundary(anchor, date(2024, 3, 2)), Some(date(2024, 3, 15)));
        assert_eq!(monthly.next_boundary(anchor, date(2024, 3, 15)), Some(date(2024, 3, 15)));
    }

    #[test]
    fn test_daily_and_repayment_boundaries() {
        let anchor = date(2024, 1, 1);
        assert_eq!(RecalculationFrequency::Daily.next_boundary(anchor, date(2024, 2, 3)), Some(date(2024, 2, 3)));
        assert_eq!(RecalculationFrequency::SameAsRepayment.next_boundary(anchor, date(2024, 2, 3)), None);
    }

    #[test]
    fn test_compounding_kinds() {
        assert!(CompoundingKind::InterestAndFee.compounds_interest());
        assert!(CompoundingKind::InterestAndFee.compounds_fees());
        assert!(!CompoundingKind::Interest.compounds_fees());
        assert!(!CompoundingKind::None.compounds_interest());
    }
}
