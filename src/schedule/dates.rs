use chrono::{Days, Months, NaiveDate};

use crate::types::PeriodFrequency;

/// date `count` frequency units after `date`
pub fn add_periods(date: NaiveDate, count: u32, frequency: PeriodFrequency) -> Option<NaiveDate> {
    match frequency {
        PeriodFrequency::Days => date.checked_add_days(Days::new(count as u64)),
        PeriodFrequency::Weeks => date.checked_add_days(Days::new(count as u64 * 7)),
        PeriodFrequency::Months => date.checked_add_months(Months::new(count)),
        PeriodFrequency::Years => date.checked_add_months(Months::new(count.checked_mul(12)?)),
    }
}

/// nominal (unadjusted) due dates of the regular periods
///
/// dates are measured from an anchor rather than chained, so a month-end
/// anchor keeps its day after passing through a short month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueDateGenerator {
    anchor_date: NaiveDate,
    anchor_index: u32,
    every: u32,
    frequency: PeriodFrequency,
    next_index: u32,
}

impl DueDateGenerator {
    pub fn new(
        schedule_start: NaiveDate,
        first_repayment_date: Option<NaiveDate>,
        every: u32,
        frequency: PeriodFrequency,
    ) -> Self {
        let (anchor_date, anchor_index) = match first_repayment_date {
            Some(first) => (first, 1),
            None => (schedule_start, 0),
        };
        Self {
            anchor_date,
            anchor_index,
            every,
            frequency,
            next_index: 1,
        }
    }

    /// regular period index the next due date belongs to, from 1
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn nominal(&self, index: u32) -> Option<NaiveDate> {
        let offset = index.checked_sub(self.anchor_index)?;
        add_periods(self.anchor_date, offset.checked_mul(self.every)?, self.frequency)
    }

    /// nominal due date of the next regular period, without consuming it
    pub fn peek(&self) -> Option<NaiveDate> {
        self.nominal(self.next_index)
    }

    pub fn commit(&mut self) {
        self.next_index += 1;
    }

    /// measure later periods from a moved due date
    pub fn reanchor(&mut self, date: NaiveDate, index: u32) {
        self.anchor_date = date;
        self.anchor_index = index;
    }
}
