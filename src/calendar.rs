use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// longest run of closed days searched before a shift gives up
pub const MAX_SHIFT_DAYS: u32 = 366;

/// read-only view of a holiday and working-day calendar
pub trait HolidayCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool;

    fn is_working_day(&self, date: NaiveDate) -> bool;

    fn is_business_day(&self, date: NaiveDate) -> bool {
        self.is_working_day(date) && !self.is_holiday(date)
    }

    /// first business day on or after the date
    fn next_business_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        scan(date, MAX_SHIFT_DAYS, |d| d.succ_opt(), |d| self.is_business_day(d))
    }

    /// last business day on or before the date
    fn previous_business_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        scan(date, MAX_SHIFT_DAYS, |d| d.pred_opt(), |d| self.is_business_day(d))
    }
}

fn scan(
    start: NaiveDate,
    limit: u32,
    step: impl Fn(NaiveDate) -> Option<NaiveDate>,
    accept: impl Fn(NaiveDate) -> bool,
) -> Option<NaiveDate> {
    let mut date = start;
    for _ in 0..=limit {
        if accept(date) {
            return Some(date);
        }
        date = step(date)?;
    }
    None
}

/// in-memory calendar of weekend days and explicit holidays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayList {
    weekend: Vec<Weekday>,
    holidays: BTreeSet<NaiveDate>,
}

impl HolidayList {
    /// every day is a business day
    pub fn new() -> Self {
        Self::default()
    }

    /// saturday and sunday closed
    pub fn weekends_only() -> Self {
        Self {
            weekend: vec![Weekday::Sat, Weekday::Sun],
            holidays: BTreeSet::new(),
        }
    }

    pub fn with_holidays(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(dates);
        self
    }

    pub fn add_holiday(&mut self, date: NaiveDate) {
        self.holidays.insert(date);
    }
}

impl HolidayCalendar for HolidayList {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    fn is_working_day(&self, date: NaiveDate) -> bool {
        !self.weekend.contains(&date.weekday())
    }
}

/// direction a due date moves when it lands on a closed day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftDirection {
    NextBusinessDay,
    PreviousBusinessDay,
    Unadjusted,
}

/// holiday and non-working-day handling for due dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingDayPolicy {
    pub allow_transactions_on_holiday: bool,
    pub allow_transactions_on_non_working_day: bool,
    pub shift: ShiftDirection,
    /// tried only when the primary shift lands on or before the period start
    pub fallback_shift: Option<ShiftDirection>,
}

impl Default for WorkingDayPolicy {
    fn default() -> Self {
        Self {
            allow_transactions_on_holiday: false,
            allow_transactions_on_non_working_day: false,
            shift: ShiftDirection::NextBusinessDay,
            fallback_shift: None,
        }
    }
}

impl WorkingDayPolicy {
    /// due dates are never moved
    pub fn unadjusted() -> Self {
        Self {
            shift: ShiftDirection::Unadjusted,
            ..Self::default()
        }
    }

    fn is_acceptable(&self, calendar: &dyn HolidayCalendar, date: NaiveDate) -> bool {
        (self.allow_transactions_on_holiday || !calendar.is_holiday(date))
            && (self.allow_transactions_on_non_working_day || calendar.is_working_day(date))
    }

    fn shift_with(
        &self,
        calendar: &dyn HolidayCalendar,
        date: NaiveDate,
        direction: ShiftDirection,
    ) -> Option<NaiveDate> {
        if self.is_acceptable(calendar, date) {
            return Some(date);
        }
        let strict = !self.allow_transactions_on_holiday && !self.allow_transactions_on_non_working_day;
        match direction {
            ShiftDirection::Unadjusted => Some(date),
            ShiftDirection::NextBusinessDay if strict => calendar.next_business_day(date),
            ShiftDirection::PreviousBusinessDay if strict => calendar.previous_business_day(date),
            ShiftDirection::NextBusinessDay => {
                scan(date, MAX_SHIFT_DAYS, |d| d.succ_opt(), |d| self.is_acceptable(calendar, d))
            }
            ShiftDirection::PreviousBusinessDay => {
                scan(date, MAX_SHIFT_DAYS, |d| d.pred_opt(), |d| self.is_acceptable(calendar, d))
            }
        }
    }

    /// move a nominal due date onto an allowed day strictly after the period start
    pub fn adjust_due_date(
        &self,
        calendar: &dyn HolidayCalendar,
        period_start: NaiveDate,
        nominal: NaiveDate,
    ) -> Option<NaiveDate> {
        if let Some(shifted) = self.shift_with(calendar, nominal, self.shift) {
            if shifted > period_start {
                return Some(shifted);
            }
        }
        let fallback = self.fallback_shift?;
        warn!(%nominal, ?fallback, "primary due date shift failed, retrying with fallback direction");
        self.shift_with(calendar, nominal, fallback)
            .filter(|shifted| *shifted > period_start)
    }
}
