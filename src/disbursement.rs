use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{Result, ScheduleError};
use crate::types::LoanId;

/// one planned or actual disbursement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementTranche {
    pub expected_date: NaiveDate,
    pub actual_date: Option<NaiveDate>,
    pub principal: Money,
    /// fee due with this tranche
    pub charge_amount: Money,
}

impl DisbursementTranche {
    pub fn planned(expected_date: NaiveDate, principal: Money) -> Self {
        Self {
            expected_date,
            actual_date: None,
            principal,
            charge_amount: Money::ZERO,
        }
    }

    pub fn disbursed_on(mut self, actual_date: NaiveDate) -> Self {
        self.actual_date = Some(actual_date);
        self
    }

    pub fn with_charge(mut self, charge_amount: Money) -> Self {
        self.charge_amount = charge_amount;
        self
    }

    pub fn effective_date(&self) -> NaiveDate {
        self.actual_date.unwrap_or(self.expected_date)
    }

    pub fn is_disbursed(&self) -> bool {
        self.actual_date.is_some()
    }

    /// effective date in (from_exclusive, to_inclusive]
    pub fn is_due_for_disbursement(&self, from_exclusive: NaiveDate, to_inclusive: NaiveDate) -> bool {
        let date = self.effective_date();
        date > from_exclusive && date <= to_inclusive
    }
}

/// most recently expected first
impl Ord for DisbursementTranche {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .expected_date
            .cmp(&self.expected_date)
            .then_with(|| other.actual_date.cmp(&self.actual_date))
            .then_with(|| self.principal.cmp(&other.principal))
            .then_with(|| self.charge_amount.cmp(&other.charge_amount))
    }
}

impl PartialOrd for DisbursementTranche {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// all tranches of one loan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementPlan {
    tranches: Vec<DisbursementTranche>,
}

impl DisbursementPlan {
    pub fn new(mut tranches: Vec<DisbursementTranche>) -> Self {
        tranches.sort();
        Self { tranches }
    }

    /// a single tranche on one date
    pub fn single(date: NaiveDate, principal: Money) -> Self {
        Self::new(vec![DisbursementTranche::planned(date, principal)])
    }

    pub fn add_tranche(&mut self, tranche: DisbursementTranche) {
        self.tranches.push(tranche);
        self.tranches.sort();
    }

    /// display order, most recently expected first
    pub fn tranches(&self) -> &[DisbursementTranche] {
        &self.tranches
    }

    /// consumption order, ascending effective date
    pub fn by_effective_date(&self) -> Vec<&DisbursementTranche> {
        let mut ordered: Vec<&DisbursementTranche> = self.tranches.iter().collect();
        ordered.sort_by_key(|t| (t.effective_date(), t.expected_date));
        ordered
    }

    /// fresh sequence of tranches whose effective date is in the window
    pub fn tranches_due_in_window(
        &self,
        from_exclusive: NaiveDate,
        to_inclusive: NaiveDate,
    ) -> impl Iterator<Item = &DisbursementTranche> + '_ {
        self.by_effective_date()
            .into_iter()
            .filter(move |t| t.is_due_for_disbursement(from_exclusive, to_inclusive))
    }

    /// principal actually paid out so far, zero when nothing is disbursed
    pub fn total_disbursed(&self) -> Money {
        self.tranches
            .iter()
            .filter(|t| t.is_disbursed())
            .map(|t| t.principal)
            .sum()
    }

    /// planned plus disbursed principal
    pub fn total_principal(&self) -> Money {
        self.tranches.iter().map(|t| t.principal).sum()
    }

    pub fn first_effective_date(&self) -> Option<NaiveDate> {
        self.tranches.iter().map(|t| t.effective_date()).min()
    }

    pub fn last_effective_date(&self) -> Option<NaiveDate> {
        self.tranches.iter().map(|t| t.effective_date()).max()
    }

    pub fn is_empty(&self) -> bool {
        self.tranches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tranches.len()
    }

    /// reject plans that release more than the approved principal
    pub fn validate(&self, loan_id: LoanId, approved: Money) -> Result<()> {
        if let Some(tranche) = self.tranches.iter().find(|t| !t.principal.is_positive()) {
            return Err(ScheduleError::InvalidConfiguration {
                loan_id,
                message: format!(
                    "tranche expected {} has non-positive principal {}",
                    tranche.expected_date, tranche.principal
                ),
            });
        }
        let total = self.total_principal();
        if total > approved {
            return Err(ScheduleError::InvalidConfiguration {
                loan_id,
                message: format!("tranches total {total} exceeds approved principal {approved}"),
            });
        }
        Ok(())
    }
}
