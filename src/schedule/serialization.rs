/// serialization support for schedules
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::LoanTerms;
use crate::decimal::{Money, Rate};
use crate::schedule::{DisbursementRow, LoanSchedule};
use crate::types::LoanId;

/// serializable view of a generated schedule
#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleView {
    pub loan_id: LoanId,
    pub summary: SummaryView,
    pub disbursements: Vec<DisbursementRow>,
    pub installments: Vec<InstallmentView>,
    pub metadata: MetadataView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryView {
    pub total_principal: Money,
    pub total_interest: Money,
    pub total_fees: Money,
    pub total_penalties: Money,
    pub total_repayment: Money,
    pub number_of_installments: u32,
    pub maturity_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstallmentView {
    pub number: u32,
    pub from_date: NaiveDate,
    pub due_date: NaiveDate,
    pub days_in_period: i64,
    pub principal: Money,
    pub interest: Money,
    pub fees: Money,
    pub penalties: Money,
    pub total_due: Money,
    /// principal still to be scheduled after this installment
    pub principal_outstanding: Money,
    pub recalculated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataView {
    pub interest_method: String,
    pub amortization: String,
    pub repayment_frequency: String,
    pub repayment_every: u32,
    pub day_count_convention: String,
    pub annual_interest_rate: Rate,
}

impl ScheduleView {
    pub fn from_schedule(schedule: &LoanSchedule, terms: &LoanTerms) -> Self {
        let mut remaining = schedule.total_principal();
        let installments = schedule
            .installments
            .iter()
            .map(|i| {
                remaining -= i.principal;
                InstallmentView {
                    number: i.sequence_number,
                    from_date: i.from_date,
                    due_date: i.due_date,
                    days_in_period: (i.due_date - i.from_date).num_days(),
                    principal: i.principal,
                    interest: i.interest,
                    fees: i.fees,
                    penalties: i.penalties,
                    total_due: i.total_due(),
                    principal_outstanding: remaining.max(Money::ZERO),
                    recalculated: i.is_recalculated_interest_component,
                }
            })
            .collect();

        ScheduleView {
            loan_id: schedule.loan_id,
            summary: SummaryView {
                total_principal: schedule.total_principal(),
                total_interest: schedule.total_interest(),
                total_fees: schedule.total_fees(),
                total_penalties: schedule.total_penalties(),
                total_repayment: schedule.total_repayment(),
                number_of_installments: schedule.installments.len() as u32,
                maturity_date: schedule.maturity_date(),
            },
            disbursements: schedule.disbursements.clone(),
            installments,
            metadata: MetadataView {
                interest_method: format!("{:?}", terms.interest_method),
                amortization: format!("{:?}", terms.amortization),
                repayment_frequency: format!("{:?}", terms.repayment_frequency),
                repayment_every: terms.repayment_every,
                day_count_convention: format!("{:?}", terms.day_count),
                annual_interest_rate: terms.annual_interest_rate,
            },
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
