pub mod allocation;
pub mod policy;

use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use tracing::{debug, info, warn};

use crate::calendar::HolidayCalendar;
use crate::charges::{ChargeProvider, NoCharges};
use crate::config::{EngineConfig, LoanTerms};
use crate::decimal::Money;
use crate::errors::{Result, ScheduleError};
use crate::events::{Event, EventStore};
use crate::interest::{FloatingRateProvider, NoFloatingRates};
use crate::schedule::generator::{disbursement_rows, CompoundedArrears, TailPlan, WalkOutcome};
use crate::schedule::{Installment, ScheduleGenerator};
use crate::state::{LoanState, TransactionKind};
use crate::types::{AmortizationMethod, InterestMethod};

pub use allocation::{AllocationComponent, HeadAllocation, InstallmentBalance, PaymentWaterfall};
pub use policy::InterestRecalculationPolicy;

/// regenerates a schedule tail after a triggering transaction
pub struct RecalculationController<'a> {
    calendar: &'a dyn HolidayCalendar,
    charges: &'a dyn ChargeProvider,
    floating_rates: &'a dyn FloatingRateProvider,
    config: EngineConfig,
    waterfall: PaymentWaterfall,
}

impl<'a> RecalculationController<'a> {
    pub fn new(calendar: &'a dyn HolidayCalendar) -> Self {
        Self {
            calendar,
            charges: &NoCharges,
            floating_rates: &NoFloatingRates,
            config: EngineConfig::default(),
            waterfall: PaymentWaterfall::standard(),
        }
    }

    pub fn with_charges(mut self, charges: &'a dyn ChargeProvider) -> Self {
        self.charges = charges;
        self
    }

    pub fn with_floating_rates(mut self, floating_rates: &'a dyn FloatingRateProvider) -> Self {
        self.floating_rates = floating_rates;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_waterfall(mut self, waterfall: PaymentWaterfall) -> Self {
        self.waterfall = waterfall;
        self
    }

    /// recalculate from the policy watermark, if one is set
    pub fn recalculate_pending(
        &self,
        state: &mut LoanState,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Option<Vec<Installment>>> {
        match state.policy.pending_from() {
            Some(from_date) => self.recalculate(state, from_date, time_provider, events).map(Some),
            None => Ok(None),
        }
    }

    /// regenerate every installment due on or after `from_date`
    ///
    /// installments due before the date are kept as they are. on success the
    /// new tail is spliced into the state's schedule and returned; on failure
    /// the state is left untouched.
    pub fn recalculate(
        &self,
        state: &mut LoanState,
        from_date: NaiveDate,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Vec<Installment>> {
        let loan_id = state.terms.loan_id;
        let maturity = state
            .schedule
            .maturity_date()
            .ok_or_else(|| ScheduleError::InvalidConfiguration {
                loan_id,
                message: "loan has no schedule to recalculate".to_string(),
            })?;
        if from_date > maturity {
            debug!(%loan_id, %from_date, %maturity, "recalculation date after maturity, nothing to do");
            state.policy.mark_recalculated(from_date);
            return Ok(Vec::new());
        }

        let mut split = state
            .schedule
            .first_due_on_or_after(from_date)
            .unwrap_or(state.schedule.installments.len());
        self.check_monotonic(state, from_date, split)?;

        let mark = events.events().len();
        let (allocation, outcome) = loop {
            let allocation = self.allocate_head(state, from_date, split);
            let outcome = self.walk_tail(state, split, &allocation, time_provider, events);
            match outcome {
                // a moved head period starts the tail early, so the head shrinks
                Ok(outcome) if outcome.replayed < split => {
                    events.truncate(mark);
                    debug!(%loan_id, from = split, to = outcome.replayed, "head shortened by moved due dates");
                    split = outcome.replayed;
                }
                outcome => break (allocation, outcome),
            }
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                events.truncate(mark);
                warn!(%loan_id, %from_date, error = %err, "recalculation failed, schedule kept");
                return Err(err);
            }
        };

        let tail: Vec<Installment> = outcome
            .installments
            .get(split..)
            .map(<[Installment]>::to_vec)
            .unwrap_or_default();
        state.schedule.splice_tail(split, tail.clone());
        state.schedule.disbursements = disbursement_rows(&outcome.plan);
        state.policy.mark_recalculated(from_date);

        events.emit(Event::ScheduleRecalculated {
            loan_id,
            from_date,
            retained: split as u32,
            regenerated: tail.len() as u32,
            timestamp: time_provider.now(),
        });
        info!(
            %loan_id,
            %from_date,
            retained = split,
            regenerated = tail.len(),
            prepaid = %allocation.prepaid(),
            arrears_principal = %allocation.arrears_principal(),
            "schedule recalculated"
        );
        Ok(tail)
    }

    /// settle transactions over the first `split` installments
    ///
    /// repayments and waivers count up to `from_date`, charges up to the end
    /// of the head.
    fn allocate_head(&self, state: &LoanState, from_date: NaiveDate, split: usize) -> HeadAllocation {
        let head = &state.schedule.installments[..split];
        let head_end = head.last().map_or(NaiveDate::MIN, |i| i.due_date);
        self.waterfall.allocate(
            head,
            state.transactions.iter().filter(|t| match t.kind {
                TransactionKind::ChargeApplied { .. } => t.date <= head_end,
                _ => t.date <= from_date,
            }),
        )
    }

    fn walk_tail(
        &self,
        state: &mut LoanState,
        split: usize,
        allocation: &HeadAllocation,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<WalkOutcome> {
        let installments = &state.schedule.installments;
        let head_end = installments[..split].last().map_or(NaiveDate::MIN, |i| i.due_date);
        let applied_charges = state
            .transactions
            .iter()
            .filter(|t| t.date > head_end)
            .filter_map(|t| match t.kind {
                TransactionKind::ChargeApplied { amount, kind } => Some((t.date, kind, amount)),
                _ => None,
            })
            .collect();

        let schedule_start = installments
            .first()
            .map_or(state.terms.expected_disbursement_date, |i| i.from_date);
        let policy = state.policy;
        let compounded = {
            let kind = policy.compounding.kind;
            let mut amount = Money::ZERO;
            if kind.compounds_interest() {
                amount += allocation.arrears_interest();
            }
            if kind.compounds_fees() {
                amount += allocation.arrears_charges();
            }
            amount
        };

        let tail_plan = TailPlan {
            retained: &installments[..split],
            strategy: policy.reschedule_strategy,
            held_amount: held_amount(&state.terms, &installments[split..]),
            prepayments: allocation.prepayments.clone(),
            rest_frequency: policy.rest_frequency,
            rest_anchor: policy.rest_anchor.unwrap_or(schedule_start),
            arrears_principal: allocation.arrears_principal(),
            compounding: compounded.is_positive().then_some(CompoundedArrears {
                frequency: policy.compounding.frequency,
                anchor: policy.compounding_anchor.unwrap_or(schedule_start),
                amount: compounded,
            }),
            applied_charges,
            max_installments: (installments.len() as u32).saturating_mul(2),
        };

        ScheduleGenerator::new(&state.terms, self.calendar)
            .with_charges(self.charges)
            .with_floating_rates(self.floating_rates)
            .with_config(self.config)
            .walk(&state.plan, &mut state.variations, Some(&tail_plan), time_provider, events)
    }

    /// reject dates before the earliest installment still open
    fn check_monotonic(&self, state: &LoanState, from_date: NaiveDate, split: usize) -> Result<()> {
        let installments = &state.schedule.installments;
        let head = &installments[..split];
        let allocation = self
            .waterfall
            .allocate(head, state.transactions.iter().filter(|t| t.date < from_date));
        let open_index = allocation.first_open().unwrap_or(split);
        let Some(open) = installments.get(open_index) else {
            return Ok(());
        };
        if from_date < open.from_date {
            return Err(ScheduleError::NonMonotonicRecalculationDate {
                loan_id: state.terms.loan_id,
                period: open.sequence_number,
                from_date,
                earliest_open: open.from_date,
            });
        }
        Ok(())
    }
}

/// level amount of the schedule being replaced, held by the term strategies
fn held_amount(terms: &LoanTerms, tail: &[Installment]) -> Option<Money> {
    let regular = &tail[..tail.len().saturating_sub(1)];
    regular
        .iter()
        .find(|i| i.principal.is_positive())
        .map(|i| match (terms.interest_method, terms.amortization) {
            (InterestMethod::DecliningBalance, AmortizationMethod::EqualInstallments) => i.principal + i.interest,
            _ => i.principal,
        })
}
