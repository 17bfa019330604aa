pub mod amortization;
pub mod dates;
pub mod generator;
pub mod serialization;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::LoanId;

pub use amortization::{AmortizationCalculator, PeriodAmounts};
pub use dates::DueDateGenerator;
pub use generator::ScheduleGenerator;
pub use serialization::ScheduleView;

/// one emitted repayment installment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub sequence_number: u32,
    pub from_date: NaiveDate,
    pub due_date: NaiveDate,
    pub principal: Money,
    pub interest: Money,
    pub fees: Money,
    pub penalties: Money,
    pub is_recalculated_interest_component: bool,
}

impl Installment {
    pub fn total_due(&self) -> Money {
        self.principal + self.interest + self.fees + self.penalties
    }
}

/// tranche payout shown alongside the installments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementRow {
    pub date: NaiveDate,
    pub principal: Money,
    pub charge_amount: Money,
    pub is_disbursed: bool,
}

/// complete generated schedule for one loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSchedule {
    pub loan_id: LoanId,
    pub installments: Vec<Installment>,
    pub disbursements: Vec<DisbursementRow>,
}

impl LoanSchedule {
    pub fn total_principal(&self) -> Money {
        self.installments.iter().map(|i| i.principal).sum()
    }

    pub fn total_interest(&self) -> Money {
        self.installments.iter().map(|i| i.interest).sum()
    }

    pub fn total_fees(&self) -> Money {
        self.installments.iter().map(|i| i.fees).sum()
    }

    pub fn total_penalties(&self) -> Money {
        self.installments.iter().map(|i| i.penalties).sum()
    }

    pub fn total_repayment(&self) -> Money {
        self.installments.iter().map(|i| i.total_due()).sum()
    }

    pub fn total_disbursed(&self) -> Money {
        self.disbursements.iter().map(|d| d.principal).sum()
    }

    pub fn maturity_date(&self) -> Option<NaiveDate> {
        self.installments.last().map(|i| i.due_date)
    }

    /// index of the first installment due on or after the date
    pub fn first_due_on_or_after(&self, date: NaiveDate) -> Option<usize> {
        self.installments.iter().position(|i| i.due_date >= date)
    }

    /// installments due strictly before the date
    pub fn head(&self, date: NaiveDate) -> &[Installment] {
        let split = self.first_due_on_or_after(date).unwrap_or(self.installments.len());
        &self.installments[..split]
    }

    /// replace every installment from `index` on with a new tail
    pub fn splice_tail(&mut self, index: usize, tail: Vec<Installment>) {
        self.installments.truncate(index);
        self.installments.extend(tail);
        for (i, installment) in self.installments.iter_mut().enumerate() {
            installment.sequence_number = i as u32 + 1;
        }
    }
}
