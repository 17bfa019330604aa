use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::config::LoanTerms;
use crate::decimal::{Money, Rate};
use crate::schedule::dates::add_periods;
use crate::types::{InterestCalculationPeriod, PeriodFrequency};

/// day count convention for interest calculations
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DayCountConvention {
    /// actual days / 365
    Actual365,
    /// actual days / 360
    Actual360,
    /// 30 days per month / 360 days per year
    Thirty360,
    /// actual days / actual days in year (handles leap years)
    ActualActual,
}

impl DayCountConvention {
    /// days between dates based on convention
    pub fn days_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        match self {
            DayCountConvention::Thirty360 => days_30_360(start, end),
            _ => (end - start).num_days(),
        }
    }

    /// year basis for the convention
    pub fn year_basis(&self, year: i32) -> u32 {
        match self {
            DayCountConvention::Actual365 => 365,
            DayCountConvention::Actual360 | DayCountConvention::Thirty360 => 360,
            DayCountConvention::ActualActual => {
                if is_leap_year(year) {
                    366
                } else {
                    365
                }
            }
        }
    }
}

fn days_30_360(start: NaiveDate, end: NaiveDate) -> i64 {
    let y1 = start.year() as i64;
    let y2 = end.year() as i64;
    let m1 = start.month() as i64;
    let m2 = end.month() as i64;
    let d1 = start.day().min(30) as i64;
    let d2 = if d1 == 30 { end.day().min(30) as i64 } else { end.day() as i64 };

    360 * (y2 - y1) + 30 * (m2 - m1) + (d2 - d1)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// interest-bearing balance from a date until the next segment starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSegment {
    pub from: NaiveDate,
    pub balance: Money,
}

/// per-period interest computation for one loan
#[derive(Debug, Clone, Copy)]
pub struct AccrualEngine {
    pub convention: DayCountConvention,
    pub calculation_period: InterestCalculationPeriod,
    pub frequency: PeriodFrequency,
    pub every: u32,
    pub allow_partial_period: bool,
}

impl AccrualEngine {
    pub fn new(terms: &LoanTerms) -> Self {
        Self {
            convention: terms.day_count,
            calculation_period: terms.interest_calculation_period,
            frequency: terms.repayment_frequency,
            every: terms.repayment_every,
            allow_partial_period: terms.allow_partial_period_interest,
        }
    }

    /// annual rate scaled to one repayment period
    pub fn periodic_rate(&self, annual_rate: Rate) -> Decimal {
        annual_rate.as_decimal() / self.frequency.periods_per_year() * Decimal::from(self.every)
    }

    /// share of the annual rate earned between two dates
    pub fn period_factor(&self, annual_rate: Rate, start: NaiveDate, end: NaiveDate) -> Decimal {
        match self.calculation_period {
            InterestCalculationPeriod::Daily => {
                let days = self.convention.days_between(start, end).max(0);
                let basis = self.convention.year_basis(end.year());
                annual_rate.as_decimal() * Decimal::from(days) / Decimal::from(basis)
            }
            InterestCalculationPeriod::SameAsRepaymentPeriod => {
                self.periodic_rate(annual_rate) * self.partial_fraction(start, end)
            }
        }
    }

    /// actual over nominal period length, one unless proration is allowed
    fn partial_fraction(&self, start: NaiveDate, end: NaiveDate) -> Decimal {
        if !self.allow_partial_period {
            return Decimal::ONE;
        }
        let nominal_end = match add_periods(start, self.every, self.frequency) {
            Some(date) => date,
            None => return Decimal::ONE,
        };
        let nominal_days = self.convention.days_between(start, nominal_end);
        if nominal_days <= 0 {
            return Decimal::ONE;
        }
        let actual_days = self.convention.days_between(start, end).max(0);
        Decimal::from(actual_days) / Decimal::from(nominal_days)
    }

    /// interest over a period whose balance changes at segment boundaries
    ///
    /// segments must be ordered by date; the first one is taken to start at
    /// the period start. a single segment reduces to balance x factor.
    pub fn interest_for_period(
        &self,
        annual_rate: Rate,
        start: NaiveDate,
        end: NaiveDate,
        segments: &[BalanceSegment],
    ) -> Money {
        let factor = self.period_factor(annual_rate, start, end);
        match segments {
            [] => Money::ZERO,
            [only] => Money::from_decimal(only.balance.as_decimal() * factor),
            _ => {
                let total_days = (end - start).num_days();
                if total_days <= 0 {
                    return Money::ZERO;
                }
                let mut weighted = Decimal::ZERO;
                for (i, segment) in segments.iter().enumerate() {
                    let from = if i == 0 { start } else { segment.from.max(start) };
                    let to = segments.get(i + 1).map_or(end, |next| next.from.min(end));
                    let days = (to - from).num_days().max(0);
                    weighted += segment.balance.as_decimal() * Decimal::from(days);
                }
                Money::from_decimal(weighted * factor / Decimal::from(total_days))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn engine(period: InterestCalculationPeriod, partial: bool, convention: DayCountConvention) -> AccrualEngine {
        AccrualEngine {
            convention,
            calculation_period: period,
            frequency: PeriodFrequency::Months,
            every: 1,
            allow_partial_period: partial,
        }
    }

    #[test]
    fn test_thirty_360_days() {
        let convention = DayCountConvention::Thirty360;
        assert_eq!(convention.days_between(date(2024, 1, 31), date(2024, 2, 29)), 29);
        assert_eq!(convention.days_between(date(2024, 1, 15), date(2024, 7, 15)), 180);
    }

    #[test]
    fn test_actual_actual_basis_tracks_leap_years() {
        let convention = DayCountConvention::ActualActual;
        assert_eq!(convention.year_basis(2024), 366);
        assert_eq!(convention.year_basis(2023), 365);
        assert_eq!(convention.year_basis(1900), 365);
    }

    #[test]
    fn test_same_as_repayment_period_is_one_twelfth() {
        let engine = engine(InterestCalculationPeriod::SameAsRepaymentPeriod, false, DayCountConvention::Actual365);
        let factor = engine.period_factor(Rate::from_percentage(12), date(2024, 1, 1), date(2024, 2, 1));
        assert_eq!(factor, dec!(0.01));
        // short periods still earn a full period without proration
        let short = engine.period_factor(Rate::from_percentage(12), date(2024, 1, 1), date(2024, 1, 16));
        assert_eq!(short, dec!(0.01));
    }

    #[test]
    fn test_partial_period_is_prorated() {
        let engine = engine(InterestCalculationPeriod::SameAsRepaymentPeriod, true, DayCountConvention::Actual365);
        // 2024-04-01 .. 2024-05-01 is 30 days, half of it is 15
        let factor = engine.period_factor(Rate::from_percentage(12), date(2024, 4, 1), date(2024, 4, 16));
        assert_eq!(factor, dec!(0.005));
    }

    #[test]
    fn test_daily_interest_uses_year_basis() {
        let engine = engine(InterestCalculationPeriod::Daily, false, DayCountConvention::Actual360);
        let interest = engine.interest_for_period(
            Rate::from_percentage(12),
            date(2024, 1, 1),
            date(2024, 1, 31),
            &[BalanceSegment { from: date(2024, 1, 1), balance: Money::from_major(3_600) }],
        );
        assert_eq!(interest, Money::from_major(36));
    }

    #[test]
    fn test_segments_weight_balance_by_days() {
        let engine = engine(InterestCalculationPeriod::Daily, false, DayCountConvention::Actual365);
        let segments = [
            BalanceSegment { from: date(2023, 1, 1), balance: Money::from_major(36_500) },
            BalanceSegment { from: date(2023, 1, 11), balance: Money::from_major(18_250) },
        ];
        let interest = engine.interest_for_period(Rate::from_percentage(10), date(2023, 1, 1), date(2023, 1, 21), &segments);
        // 10 days on 36,500 plus 10 days on 18,250 at 10%/365
        assert_eq!(interest, Money::from_major(150));
    }
}
