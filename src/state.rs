use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::charges::ChargeKind;
use crate::config::LoanTerms;
use crate::decimal::Money;
use crate::disbursement::{DisbursementPlan, DisbursementTranche};
use crate::errors::Result;
use crate::events::EventStore;
use crate::recalculation::InterestRecalculationPolicy;
use crate::schedule::{LoanSchedule, ScheduleGenerator};
use crate::variations::{classify, ClassifiedVariations, TermVariation};

/// money movement that can change a schedule tail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Repayment(Money),
    InterestWaiver(Money),
    ChargeApplied { amount: Money, kind: ChargeKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTransaction {
    pub id: Uuid,
    pub date: NaiveDate,
    pub kind: TransactionKind,
}

impl LoanTransaction {
    pub fn repayment(date: NaiveDate, amount: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            kind: TransactionKind::Repayment(amount),
        }
    }

    pub fn interest_waiver(date: NaiveDate, amount: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            kind: TransactionKind::InterestWaiver(amount),
        }
    }

    pub fn charge(date: NaiveDate, amount: Money, kind: ChargeKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            kind: TransactionKind::ChargeApplied { amount, kind },
        }
    }
}

/// loan state
///
/// everything a recalculation pass reads, plus the schedule it replaces.
#[derive(Debug, Clone)]
pub struct LoanState {
    pub terms: LoanTerms,
    pub plan: DisbursementPlan,
    pub variations: ClassifiedVariations,
    pub policy: InterestRecalculationPolicy,
    pub schedule: LoanSchedule,
    pub transactions: Vec<LoanTransaction>,
}

impl LoanState {
    /// generate the first schedule and wrap it in a state
    pub fn originate(
        generator: &ScheduleGenerator<'_>,
        plan: DisbursementPlan,
        variations: Vec<TermVariation>,
        policy: InterestRecalculationPolicy,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Self> {
        let mut variations = classify(variations);
        let schedule = generator.generate(&plan, &mut variations, time_provider, events)?;
        Ok(Self {
            terms: generator.terms().clone(),
            plan,
            variations,
            policy,
            schedule,
            transactions: Vec::new(),
        })
    }

    /// record a transaction and move the watermark back to its date
    pub fn record_transaction(&mut self, transaction: LoanTransaction) {
        self.policy.register_transaction(transaction.date);
        self.transactions.push(transaction);
    }

    /// add a variation and move the watermark to the first date it touches
    pub fn add_variation(&mut self, variation: TermVariation) {
        self.policy.register_transaction(variation.earliest_affected_date());
        let mut all = self.variations.to_vec();
        all.push(variation);
        self.variations = classify(all);
    }

    pub fn add_tranche(&mut self, tranche: DisbursementTranche) {
        self.policy.register_transaction(tranche.effective_date());
        self.plan.add_tranche(tranche);
    }

    pub fn total_repaid(&self) -> Money {
        self.transactions
            .iter()
            .filter_map(|t| match t.kind {
                TransactionKind::Repayment(amount) => Some(amount),
                _ => None,
            })
            .sum()
    }
}
