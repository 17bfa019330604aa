use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::LoanId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeKind {
    Fee,
    Penalty,
}

/// amount or percentage plus the basis it applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeCalculation {
    Flat(Money),
    PercentOfPrincipal(Decimal),
    PercentOfInterest(Decimal),
    PercentOfPrincipalAndInterest(Decimal),
    PercentOfDisbursed(Decimal),
}

/// fee or penalty due against a loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCharge {
    pub kind: ChargeKind,
    /// None applies the charge to every installment
    pub due_date: Option<NaiveDate>,
    pub calculation: ChargeCalculation,
    pub min_amount: Option<Money>,
    pub max_amount: Option<Money>,
}

impl ScheduledCharge {
    pub fn fee_on(due_date: NaiveDate, calculation: ChargeCalculation) -> Self {
        Self {
            kind: ChargeKind::Fee,
            due_date: Some(due_date),
            calculation,
            min_amount: None,
            max_amount: None,
        }
    }

    pub fn penalty_on(due_date: NaiveDate, calculation: ChargeCalculation) -> Self {
        Self {
            kind: ChargeKind::Penalty,
            ..Self::fee_on(due_date, calculation)
        }
    }

    /// fee charged with every installment
    pub fn installment_fee(calculation: ChargeCalculation) -> Self {
        Self {
            due_date: None,
            ..Self::fee_on(NaiveDate::MIN, calculation)
        }
    }

    pub fn with_caps(mut self, min_amount: Option<Money>, max_amount: Option<Money>) -> Self {
        self.min_amount = min_amount;
        self.max_amount = max_amount;
        self
    }

    /// falls in the installment window (from_exclusive, to_inclusive]
    pub fn applies_to(&self, from_exclusive: NaiveDate, to_inclusive: NaiveDate) -> bool {
        self.due_date
            .map_or(true, |due| due > from_exclusive && due <= to_inclusive)
    }

    /// charge amount for an installment, capped
    pub fn amount_for(&self, basis: &ChargeBasis) -> Money {
        let raw = match self.calculation {
            ChargeCalculation::Flat(amount) => amount,
            ChargeCalculation::PercentOfPrincipal(pct) => basis.principal.percentage(pct),
            ChargeCalculation::PercentOfInterest(pct) => basis.interest.percentage(pct),
            ChargeCalculation::PercentOfPrincipalAndInterest(pct) => {
                (basis.principal + basis.interest).percentage(pct)
            }
            ChargeCalculation::PercentOfDisbursed(pct) => basis.disbursed.percentage(pct),
        };
        raw.clamp_between(self.min_amount, self.max_amount)
    }
}

/// installment amounts a percentage charge is computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeBasis {
    pub principal: Money,
    pub interest: Money,
    pub disbursed: Money,
}

/// source of fees and penalties for a loan
pub trait ChargeProvider {
    /// charges due at or before the given installment due date
    fn charges_for(&self, loan_id: LoanId, due_date: NaiveDate) -> Vec<ScheduledCharge>;
}

/// provider for loans without charges
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCharges;

impl ChargeProvider for NoCharges {
    fn charges_for(&self, _loan_id: LoanId, _due_date: NaiveDate) -> Vec<ScheduledCharge> {
        Vec::new()
    }
}

/// fixed list of charges, the same for any loan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChargeList {
    charges: Vec<ScheduledCharge>,
}

impl ChargeList {
    pub fn new(charges: Vec<ScheduledCharge>) -> Self {
        Self { charges }
    }
}

impl ChargeProvider for ChargeList {
    fn charges_for(&self, _loan_id: LoanId, due_date: NaiveDate) -> Vec<ScheduledCharge> {
        self.charges
            .iter()
            .filter(|c| c.due_date.map_or(true, |d| d <= due_date))
            .cloned()
            .collect()
    }
}

/// fee and penalty totals for one installment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallmentCharges {
    pub fees: Money,
    pub penalties: Money,
}

/// sum the provider's charges falling inside one installment window
pub fn charges_for_installment(
    provider: &dyn ChargeProvider,
    loan_id: LoanId,
    from_exclusive: NaiveDate,
    due_date: NaiveDate,
    basis: &ChargeBasis,
    currency_digits: u32,
) -> InstallmentCharges {
    let mut totals = InstallmentCharges::default();
    for charge in provider.charges_for(loan_id, due_date) {
        if !charge.applies_to(from_exclusive, due_date) {
            continue;
        }
        let amount = charge.amount_for(basis).round_dp(currency_digits);
        match charge.kind {
            ChargeKind::Fee => totals.fees += amount,
            ChargeKind::Penalty => totals.penalties += amount,
        }
    }
    totals
}
