use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::interest::{CompoundingPolicy, RecalculationFrequency};
use crate::types::RescheduleStrategy;

/// interest recalculation settings plus the recalculation watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestRecalculationPolicy {
    pub compounding: CompoundingPolicy,
    pub rest_frequency: RecalculationFrequency,
    pub reschedule_strategy: RescheduleStrategy,
    /// first rest date, defaults to the schedule start
    #[serde(default)]
    pub rest_anchor: Option<NaiveDate>,
    #[serde(default)]
    pub compounding_anchor: Option<NaiveDate>,
    /// earliest date the schedule tail must be regenerated from
    #[serde(default)]
    pub recalculate_from: Option<NaiveDate>,
    #[serde(default)]
    pub last_recalculated_through: Option<NaiveDate>,
}

impl Default for InterestRecalculationPolicy {
    fn default() -> Self {
        Self::new(RescheduleStrategy::ReduceInstallmentAmount)
    }
}

impl InterestRecalculationPolicy {
    pub fn new(reschedule_strategy: RescheduleStrategy) -> Self {
        Self {
            compounding: CompoundingPolicy::default(),
            rest_frequency: RecalculationFrequency::SameAsRepayment,
            reschedule_strategy,
            rest_anchor: None,
            compounding_anchor: None,
            recalculate_from: None,
            last_recalculated_through: None,
        }
    }

    pub fn with_rest(mut self, frequency: RecalculationFrequency, anchor: Option<NaiveDate>) -> Self {
        self.rest_frequency = frequency;
        self.rest_anchor = anchor;
        self
    }

    pub fn with_compounding(mut self, compounding: CompoundingPolicy, anchor: Option<NaiveDate>) -> Self {
        self.compounding = compounding;
        self.compounding_anchor = anchor;
        self
    }

    /// move the watermark back to a transaction's date
    pub fn register_transaction(&mut self, date: NaiveDate) {
        self.recalculate_from = Some(match self.recalculate_from {
            Some(current) => current.min(date),
            None => date,
        });
    }

    pub fn pending_from(&self) -> Option<NaiveDate> {
        self.recalculate_from
    }

    pub fn mark_recalculated(&mut self, from_date: NaiveDate) {
        self.recalculate_from = None;
        self.last_recalculated_through = Some(from_date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_watermark_only_moves_backward() {
        let mut policy = InterestRecalculationPolicy::default();
        assert_eq!(policy.pending_from(), None);

        policy.register_transaction(date(2024, 3, 1));
        policy.register_transaction(date(2024, 4, 1));
        policy.register_transaction(date(2024, 2, 15));
        assert_eq!(policy.pending_from(), Some(date(2024, 2, 15)));

        policy.mark_recalculated(date(2024, 2, 15));
        assert_eq!(policy.pending_from(), None);
        assert_eq!(policy.last_recalculated_through, Some(date(2024, 2, 15)));
    }
}
