use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Rate;

/// source of published index rates for floating-rate loans
pub trait FloatingRateProvider {
    /// index rate in force for an interest period
    fn index_rate(&self, from: NaiveDate, to: NaiveDate) -> Option<Rate>;
}

/// provider with no published rates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFloatingRates;

impl FloatingRateProvider for NoFloatingRates {
    fn index_rate(&self, _from: NaiveDate, _to: NaiveDate) -> Option<Rate> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingRatePeriod {
    pub from_date: NaiveDate,
    pub rate: Rate,
}

/// in-memory index history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingRateTable {
    periods: Vec<FloatingRatePeriod>,
}

impl FloatingRateTable {
    pub fn new(mut periods: Vec<FloatingRatePeriod>) -> Self {
        periods.sort_by_key(|p| p.from_date);
        Self { periods }
    }

    pub fn periods(&self) -> &[FloatingRatePeriod] {
        &self.periods
    }
}

impl FloatingRateProvider for FloatingRateTable {
    /// latest period starting on or before the window start
    fn index_rate(&self, from: NaiveDate, _to: NaiveDate) -> Option<Rate> {
        self.periods
            .iter()
            .take_while(|p| p.from_date <= from)
            .last()
            .map(|p| p.rate)
    }
}
