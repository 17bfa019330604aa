use chrono::NaiveDate;
use thiserror::Error;

use crate::borrower_cycle::CycleParameter;
use crate::decimal::Money;
use crate::types::LoanId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("conflicting term variation on loan {loan_id} at period {period} ({date}): {message}")]
    InvalidVariationConflict {
        loan_id: LoanId,
        period: u32,
        date: NaiveDate,
        message: String,
    },

    #[error("schedule exhaustion mismatch on loan {loan_id} at period {period} ({date}): outstanding {outstanding}, {message}")]
    ScheduleExhaustionMismatch {
        loan_id: LoanId,
        period: u32,
        date: NaiveDate,
        outstanding: Money,
        message: String,
    },

    #[error("unresolvable borrower cycle {cycle_number} for {parameter:?} on loan {loan_id}: {message}")]
    UnresolvableCycleVariation {
        loan_id: LoanId,
        parameter: CycleParameter,
        cycle_number: u32,
        message: String,
    },

    #[error("recalculation date {from_date} on loan {loan_id} precedes open installment {period} starting {earliest_open}")]
    NonMonotonicRecalculationDate {
        loan_id: LoanId,
        period: u32,
        from_date: NaiveDate,
        earliest_open: NaiveDate,
    },

    #[error("no allowed business day for due date {date} on loan {loan_id} at period {period}")]
    CalendarShiftFailed {
        loan_id: LoanId,
        period: u32,
        date: NaiveDate,
    },

    #[error("no floating index rate for {from}..{to} on loan {loan_id} at period {period}")]
    FloatingRateUnavailable {
        loan_id: LoanId,
        period: u32,
        from: NaiveDate,
        to: NaiveDate,
    },

    #[error("invalid configuration on loan {loan_id}: {message}")]
    InvalidConfiguration {
        loan_id: LoanId,
        message: String,
    },

    #[error("invalid date on loan {loan_id}: {message}")]
    InvalidDate {
        loan_id: LoanId,
        message: String,
    },

    #[error("malformed loan terms: {message}")]
    MalformedTerms {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
