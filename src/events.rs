use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::types::LoanId;
use crate::variations::TermVariationKind;

/// audit events emitted during a generation or recalculation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ScheduleGenerated {
        loan_id: LoanId,
        installments: u32,
        total_principal: Money,
        total_interest: Money,
        timestamp: DateTime<Utc>,
    },
    VariationApplied {
        loan_id: LoanId,
        kind: TermVariationKind,
        applicable_from: NaiveDate,
        period: u32,
        timestamp: DateTime<Utc>,
    },
    TrancheReleased {
        loan_id: LoanId,
        effective_date: NaiveDate,
        principal: Money,
        period: u32,
        timestamp: DateTime<Utc>,
    },
    DueDateAdjusted {
        loan_id: LoanId,
        period: u32,
        nominal: NaiveDate,
        adjusted: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    FloatingRateFallback {
        loan_id: LoanId,
        period: u32,
        base_rate: Rate,
        timestamp: DateTime<Utc>,
    },
    ScheduleRecalculated {
        loan_id: LoanId,
        from_date: NaiveDate,
        retained: u32,
        regenerated: u32,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// keep only events recorded before a failed pass started
    pub(crate) fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }
}
