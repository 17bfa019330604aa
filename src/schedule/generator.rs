use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use tracing::{debug, info, warn};

use crate::calendar::HolidayCalendar;
use crate::charges::{charges_for_installment, ChargeBasis, ChargeKind, ChargeProvider, NoCharges};
use crate::config::{EngineConfig, LoanTerms};
use crate::decimal::{Money, Rate};
use crate::disbursement::DisbursementPlan;
use crate::errors::{Result, ScheduleError};
use crate::events::{Event, EventStore};
use crate::interest::{
    AccrualEngine, BalanceSegment, FloatingRateProvider, NoFloatingRates, RecalculationFrequency,
};
use crate::schedule::amortization::AmortizationCalculator;
use crate::schedule::dates::DueDateGenerator;
use crate::schedule::{DisbursementRow, Installment, LoanSchedule};
use crate::types::{InterestMethod, RescheduleStrategy};
use crate::variations::{ClassifiedVariations, TermVariation};

/// overdue amounts folded into the interest base of a regenerated tail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CompoundedArrears {
    pub frequency: RecalculationFrequency,
    pub anchor: NaiveDate,
    pub amount: Money,
}

/// instructions for regenerating a schedule from a date onward
#[derive(Debug, Clone)]
pub(crate) struct TailPlan<'r> {
    /// head installments, replayed verbatim while their dates still match
    pub retained: &'r [Installment],
    pub strategy: RescheduleStrategy,
    pub held_amount: Option<Money>,
    /// principal paid ahead of schedule, by payment date
    pub prepayments: Vec<(NaiveDate, Money)>,
    pub rest_frequency: RecalculationFrequency,
    pub rest_anchor: NaiveDate,
    /// overdue head principal, still interest bearing
    pub arrears_principal: Money,
    pub compounding: Option<CompoundedArrears>,
    /// charges applied inside the tail, by charge date
    pub applied_charges: Vec<(NaiveDate, ChargeKind, Money)>,
    /// cap on a lengthened schedule
    pub max_installments: u32,
}

impl TailPlan<'_> {
    fn prepaid(&self) -> Money {
        self.prepayments.iter().map(|(_, amount)| *amount).sum()
    }

    /// rest date from which a prepayment stops bearing interest
    fn rest_date(&self, paid_on: NaiveDate, start: NaiveDate, due: NaiveDate) -> NaiveDate {
        match self.rest_frequency.next_boundary(self.rest_anchor, paid_on) {
            Some(boundary) => boundary,
            None if paid_on <= start => start,
            None => due,
        }
    }
}

/// installments of one pass and the plan that produced them
#[derive(Debug, Clone)]
pub(crate) struct WalkOutcome {
    pub installments: Vec<Installment>,
    pub plan: DisbursementPlan,
    /// retained head installments emitted before the tail
    pub replayed: usize,
}

/// schedule generation orchestrator
pub struct ScheduleGenerator<'a> {
    terms: &'a LoanTerms,
    calendar: &'a dyn HolidayCalendar,
    charges: &'a dyn ChargeProvider,
    floating_rates: &'a dyn FloatingRateProvider,
    config: EngineConfig,
}

impl<'a> ScheduleGenerator<'a> {
    pub fn new(terms: &'a LoanTerms, calendar: &'a dyn HolidayCalendar) -> Self {
        Self {
            terms,
            calendar,
            charges: &NoCharges,
            floating_rates: &NoFloatingRates,
            config: EngineConfig::default(),
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

    pub fn terms(&self) -> &LoanTerms {
        self.terms
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// generate the full schedule from the first disbursement
    ///
    /// the variation cursors are reset first, so the same classified set can
    /// be passed to repeated generations.
    pub fn generate(
        &self,
        plan: &DisbursementPlan,
        variations: &mut ClassifiedVariations,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<LoanSchedule> {
        let loan_id = self.terms.loan_id;
        let mark = events.events().len();
        let WalkOutcome {
            installments,
            plan: effective_plan,
            ..
        } = match self.walk(plan, variations, None, time_provider, events) {
            Ok(outcome) => outcome,
            Err(err) => {
                events.truncate(mark);
                warn!(%loan_id, error = %err, "schedule generation failed");
                return Err(err);
            }
        };

        let schedule = LoanSchedule {
            loan_id,
            installments,
            disbursements: disbursement_rows(&effective_plan),
        };
        events.emit(Event::ScheduleGenerated {
            loan_id,
            installments: schedule.installments.len() as u32,
            total_principal: schedule.total_principal(),
            total_interest: schedule.total_interest(),
            timestamp: time_provider.now(),
        });
        info!(
            %loan_id,
            installments = schedule.installments.len(),
            total_interest = %schedule.total_interest(),
            "schedule generated"
        );
        Ok(schedule)
    }

    /// one orchestration pass, optionally replaying a head and regenerating a tail
    pub(crate) fn walk(
        &self,
        plan: &DisbursementPlan,
        variations: &mut ClassifiedVariations,
        tail: Option<&TailPlan<'_>>,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<WalkOutcome> {
        let terms = self.terms;
        let loan_id = terms.loan_id;
        terms.validate()?;
        let resolved = terms.resolve()?;
        let plan = self.effective_plan(plan, resolved.principal)?;

        variations.reset();
        variations.detect_conflicts(loan_id)?;

        let target = i64::from(resolved.number_of_repayments) + variations.adjust_installment_count();
        let target = u32::try_from(target)
            .ok()
            .filter(|t| *t > 0)
            .ok_or_else(|| ScheduleError::InvalidConfiguration {
                loan_id,
                message: format!("installment count {target} after variations is not positive"),
            })?;
        if target > self.config.max_installments {
            return Err(ScheduleError::InvalidConfiguration {
                loan_id,
                message: format!(
                    "{target} installments exceeds the limit of {}",
                    self.config.max_installments
                ),
            });
        }
        if terms.grace_on_principal >= target {
            return Err(ScheduleError::InvalidConfiguration {
                loan_id,
                message: format!("principal grace of {} covers every installment", terms.grace_on_principal),
            });
        }

        let schedule_start = plan
            .first_effective_date()
            .unwrap_or(terms.expected_disbursement_date);
        if let Some(first) = terms.first_repayment_date {
            if first <= schedule_start {
                return Err(ScheduleError::InvalidDate {
                    loan_id,
                    message: format!("first repayment {first} is not after the first disbursement {schedule_start}"),
                });
            }
        }
        let mut dates = DueDateGenerator::new(
            schedule_start,
            terms.first_repayment_date,
            terms.repayment_every,
            terms.repayment_frequency,
        );

        let (installments, replayed) = {
            let mut pass = Pass {
                generator: self,
                plan: &plan,
                tail,
                time_provider,
                events,
                accrual: AccrualEngine::new(terms),
                calculator: AmortizationCalculator::new(
                    terms.amortization,
                    terms.interest_method,
                    terms.currency_digits,
                ),
                target,
                phase: PassPhase::AwaitingDisbursement,
                period_start: schedule_start,
                released_through: NaiveDate::MIN,
                released: Money::ZERO,
                outstanding: Money::ZERO,
                base_rate: resolved.annual_rate,
                variation_rate: None,
                last_rate: None,
                level_amount: None,
                hold_level: false,
                deferred_interest: Money::ZERO,
                pending_inserts: 0,
                in_tail: false,
                tail_start: schedule_start,
                unreported_prepaid: Money::ZERO,
                compounded_from: None,
                installments: Vec::with_capacity(target as usize),
                replayed: 0,
            };
            pass.run(&mut dates, variations)?;
            (pass.installments, pass.replayed)
        };
        Ok(WalkOutcome {
            installments,
            plan,
            replayed,
        })
    }

    /// the caller's plan, or one implicit tranche for a single-disbursement loan
    fn effective_plan(&self, plan: &DisbursementPlan, approved: Money) -> Result<DisbursementPlan> {
        let terms = self.terms;
        if plan.is_empty() {
            if terms.multi_disbursement {
                return Err(ScheduleError::InvalidConfiguration {
                    loan_id: terms.loan_id,
                    message: "multi-disbursement loan has no tranches".to_string(),
                });
            }
            return Ok(DisbursementPlan::single(terms.expected_disbursement_date, approved));
        }
        if !terms.multi_disbursement && plan.len() > 1 {
            return Err(ScheduleError::InvalidConfiguration {
                loan_id: terms.loan_id,
                message: format!("{} tranches on a single-disbursement loan", plan.len()),
            });
        }
        plan.validate(terms.loan_id, approved)?;
        Ok(plan.clone())
    }
}

pub(crate) fn disbursement_rows(plan: &DisbursementPlan) -> Vec<DisbursementRow> {
    plan.by_effective_date()
        .into_iter()
        .map(|t| DisbursementRow {
            date: t.effective_date(),
            principal: t.principal,
            charge_amount: t.charge_amount,
            is_disbursed: t.is_disbursed(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassPhase {
    AwaitingDisbursement,
    AccumulatingPeriod,
    ScheduleComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodKind {
    Regular,
    Inserted { principal: Money },
}

/// due date settled for a period after shift variations
struct ShiftLookahead {
    due: NaiveDate,
    consumed: usize,
    applied: Option<TermVariation>,
}

/// mutable state of one orchestration pass
struct Pass<'p> {
    generator: &'p ScheduleGenerator<'p>,
    plan: &'p DisbursementPlan,
    tail: Option<&'p TailPlan<'p>>,
    time_provider: &'p SafeTimeProvider,
    events: &'p mut EventStore,
    accrual: AccrualEngine,
    calculator: AmortizationCalculator,
    target: u32,
    phase: PassPhase,
    period_start: NaiveDate,
    released_through: NaiveDate,
    released: Money,
    /// principal released but not yet scheduled
    outstanding: Money,
    base_rate: Rate,
    variation_rate: Option<Rate>,
    last_rate: Option<Rate>,
    level_amount: Option<Money>,
    hold_level: bool,
    deferred_interest: Money,
    pending_inserts: u32,
    in_tail: bool,
    tail_start: NaiveDate,
    unreported_prepaid: Money,
    compounded_from: Option<(NaiveDate, Money)>,
    installments: Vec<Installment>,
    replayed: usize,
}

impl Pass<'_> {
    fn run(&mut self, dates: &mut DueDateGenerator, variations: &mut ClassifiedVariations) -> Result<()> {
        let terms = self.generator.terms;
        loop {
            let emitted = self.installments.len() as u32;
            if self.is_complete(emitted)? {
                break;
            }
            let period = emitted + 1;
            self.release_tranches(period);
            self.pending_inserts = variations.inserts.remaining().len() as u32;

            let nominal = dates.peek().ok_or_else(|| ScheduleError::InvalidDate {
                loan_id: terms.loan_id,
                message: format!("due date out of range after {}", self.period_start),
            })?;
            if nominal <= self.period_start {
                return Err(self.conflict(period, nominal, "due date does not follow the previous installment"));
            }
            let adjusted = terms
                .working_days
                .adjust_due_date(self.generator.calendar, self.period_start, nominal)
                .ok_or(ScheduleError::CalendarShiftFailed {
                    loan_id: terms.loan_id,
                    period,
                    date: nominal,
                })?;

            let shift = self.lookahead_due_date_shift(variations, period, nominal, adjusted)?;
            self.apply_rate_variations(variations, period)?;

            if let Some(insert_due) = variations.inserts.peek().map(TermVariation::inserted_due_date) {
                if insert_due <= self.period_start || insert_due == shift.due {
                    return Err(self.conflict(period, insert_due, "inserted installment collides with an existing due date"));
                }
                if insert_due < shift.due {
                    for _ in 0..shift.consumed {
                        variations.previous();
                    }
                    if let Some(insert) = variations.inserts.next() {
                        self.record_variation(&insert, period);
                        let principal = Money::from_decimal(insert.decimal_value.unwrap_or_default())
                            .round_dp(terms.currency_digits);
                        self.close_period(PeriodKind::Inserted { principal }, insert_due, period)?;
                    }
                    continue;
                }
            }

            if let Some(delete_at) = variations.deletes.peek().map(|v| v.applicable_from) {
                if delete_at == nominal || delete_at == adjusted || delete_at == shift.due {
                    if let Some(delete) = variations.deletes.next() {
                        self.record_variation(&delete, period);
                    }
                    self.commit_due_date(dates, &shift, period);
                    debug!(loan_id = %terms.loan_id, period, %delete_at, "installment deleted, principal folds forward");
                    continue;
                }
                if delete_at < shift.due {
                    return Err(self.conflict(period, delete_at, "deleted installment date is not a due date"));
                }
            }

            self.commit_due_date(dates, &shift, period);
            if shift.due != nominal {
                self.events.emit(Event::DueDateAdjusted {
                    loan_id: terms.loan_id,
                    period,
                    nominal,
                    adjusted: shift.due,
                    timestamp: self.time_provider.now(),
                });
            }
            self.close_period(PeriodKind::Regular, shift.due, period)?;
        }
        self.finish(variations)
    }

    fn reduces_term(&self) -> bool {
        self.in_tail
            && self
                .tail
                .is_some_and(|t| t.strategy == RescheduleStrategy::ReduceNumberOfInstallments)
    }

    /// held installment under the extend strategy, which may finish early
    fn extends_last(&self) -> bool {
        self.in_tail
            && self
                .tail
                .is_some_and(|t| t.strategy == RescheduleStrategy::ExtendLastInstallment && t.held_amount.is_some())
    }

    fn is_complete(&self, emitted: u32) -> Result<bool> {
        if emitted >= self.generator.config.max_installments {
            return Err(ScheduleError::InvalidConfiguration {
                loan_id: self.generator.terms.loan_id,
                message: format!(
                    "schedule exceeds the limit of {} installments",
                    self.generator.config.max_installments
                ),
            });
        }
        if self.reduces_term() {
            if self.outstanding.is_zero() && !self.tranches_pending() {
                return Ok(true);
            }
            if let Some(tail) = self.tail {
                if emitted >= tail.max_installments {
                    return Err(self.mismatch(emitted, self.period_start, "held installment cannot repay the balance"));
                }
            }
            return Ok(false);
        }
        if self.extends_last() && self.outstanding.is_zero() && !self.tranches_pending() {
            return Ok(true);
        }
        Ok(emitted >= self.target)
    }

    fn tranches_pending(&self) -> bool {
        self.plan
            .tranches()
            .iter()
            .any(|t| t.effective_date() > self.released_through)
    }

    fn release_tranches(&mut self, period: u32) {
        let plan = self.plan;
        let loan_id = self.generator.terms.loan_id;
        for tranche in plan.tranches_due_in_window(self.released_through, self.period_start) {
            self.released += tranche.principal;
            self.outstanding += tranche.principal;
            self.level_amount = None;
            self.phase = PassPhase::AccumulatingPeriod;
            self.events.emit(Event::TrancheReleased {
                loan_id,
                effective_date: tranche.effective_date(),
                principal: tranche.principal,
                period,
                timestamp: self.time_provider.now(),
            });
            debug!(%loan_id, period, principal = %tranche.principal, "tranche released");
        }
        self.released_through = self.period_start;
    }

    /// consume shift variations aimed at this period; the last one wins
    fn lookahead_due_date_shift(
        &self,
        variations: &mut ClassifiedVariations,
        period: u32,
        nominal: NaiveDate,
        adjusted: NaiveDate,
    ) -> Result<ShiftLookahead> {
        let mut lookahead = ShiftLookahead {
            due: adjusted,
            consumed: 0,
            applied: None,
        };
        while variations.due_date_shifts.has_variation_on_or_before(nominal.max(adjusted)) {
            let Some(shift) = variations.due_date_shifts.next() else {
                break;
            };
            lookahead.consumed += 1;
            if shift.applicable_from != nominal && shift.applicable_from != adjusted {
                return Err(self.conflict(period, shift.applicable_from, "due date shift does not match a due date"));
            }
            let new_due = shift
                .date_value
                .ok_or_else(|| self.conflict(period, shift.applicable_from, "due date shift without a new date"))?;
            if new_due <= self.period_start {
                return Err(self.conflict(period, new_due, "shifted due date is not after the period start"));
            }
            lookahead.due = new_due;
            lookahead.applied = Some(shift);
        }
        Ok(lookahead)
    }

    fn commit_due_date(&mut self, dates: &mut DueDateGenerator, shift: &ShiftLookahead, period: u32) {
        if let Some(applied) = &shift.applied {
            if !applied.is_specific_to_installment {
                dates.reanchor(shift.due, dates.next_index());
            }
            self.record_variation(applied, period);
        }
        dates.commit();
    }

    fn apply_rate_variations(&mut self, variations: &mut ClassifiedVariations, period: u32) -> Result<()> {
        while let Some(variation) = variations.next_rate_on_or_before(self.period_start) {
            let percent = variation
                .decimal_value
                .ok_or_else(|| self.conflict(period, variation.applicable_from, "rate variation without a rate"))?;
            self.variation_rate = Some(Rate::from_annual_percent(percent));
            self.record_variation(&variation, period);
        }
        Ok(())
    }

    fn record_variation(&mut self, variation: &TermVariation, period: u32) {
        let loan_id = self.generator.terms.loan_id;
        debug!(%loan_id, period, kind = ?variation.kind, applicable_from = %variation.applicable_from, "variation applied");
        self.events.emit(Event::VariationApplied {
            loan_id,
            kind: variation.kind,
            applicable_from: variation.applicable_from,
            period,
            timestamp: self.time_provider.now(),
        });
    }

    /// variation rate, else floating index plus spread, else the resolved rate
    fn period_rate(&mut self, start: NaiveDate, due: NaiveDate, period: u32) -> Result<Rate> {
        if let Some(rate) = self.variation_rate {
            return Ok(rate);
        }
        let terms = self.generator.terms;
        let Some(floating) = terms.floating_rate else {
            return Ok(self.base_rate);
        };
        match self.generator.floating_rates.index_rate(start, due) {
            Some(index) => Ok(index.plus(floating.differential)),
            None if floating.fallback_to_base_rate => {
                warn!(loan_id = %terms.loan_id, period, %start, %due, "no floating index rate, using base rate");
                self.events.emit(Event::FloatingRateFallback {
                    loan_id: terms.loan_id,
                    period,
                    base_rate: self.base_rate,
                    timestamp: self.time_provider.now(),
                });
                Ok(self.base_rate)
            }
            None => Err(ScheduleError::FloatingRateUnavailable {
                loan_id: terms.loan_id,
                period,
                from: start,
                to: due,
            }),
        }
    }

    /// retained installment for a head period of a recalculation
    ///
    /// the tail starts at the first period past the head, or earlier when a
    /// variation has moved a head period's dates.
    fn replay_head(&self, start: NaiveDate, due: NaiveDate) -> Option<Installment> {
        let tail = self.tail?;
        if self.in_tail {
            return None;
        }
        let retained = tail.retained.get(self.installments.len())?;
        if retained.from_date != start || retained.due_date != due {
            debug!(
                loan_id = %self.generator.terms.loan_id,
                sequence = retained.sequence_number,
                %start,
                %due,
                "retained installment moved, tail starts here"
            );
            return None;
        }
        Some(retained.clone())
    }

    fn enter_tail(&mut self, tail: &TailPlan<'_>, start: NaiveDate) -> Result<()> {
        self.in_tail = true;
        self.tail_start = start;

        let prepaid = tail.prepaid();
        if prepaid > self.outstanding {
            return Err(self.mismatch(
                self.installments.len() as u32 + 1,
                start,
                "prepaid principal exceeds the outstanding balance",
            ));
        }
        self.outstanding -= prepaid;
        self.unreported_prepaid = prepaid;

        match (tail.strategy, tail.held_amount) {
            (RescheduleStrategy::ReduceInstallmentAmount, _) | (_, None) => {
                self.level_amount = None;
            }
            (_, Some(held)) => {
                self.level_amount = Some(held);
                self.hold_level = true;
            }
        }

        self.compounded_from = tail
            .compounding
            .filter(|c| c.amount.is_positive())
            .map(|c| (c.frequency.next_boundary(c.anchor, start).unwrap_or(start), c.amount));

        info!(
            loan_id = %self.generator.terms.loan_id,
            tail_start = %start,
            %prepaid,
            strategy = ?tail.strategy,
            "regenerating schedule tail"
        );
        Ok(())
    }

    /// interest-bearing balance through a period, split where it changes
    fn interest_segments(&self, start: NaiveDate, due: NaiveDate) -> Vec<BalanceSegment> {
        let tail = match self.tail {
            Some(tail) if self.in_tail => tail,
            _ => {
                return vec![BalanceSegment {
                    from: start,
                    balance: self.outstanding,
                }]
            }
        };

        let mut base = self.outstanding + tail.arrears_principal;
        let mut changes: Vec<(NaiveDate, Money)> = Vec::new();
        for (paid_on, amount) in &tail.prepayments {
            if *paid_on <= self.tail_start {
                continue;
            }
            let rest = tail.rest_date(*paid_on, start, due);
            if rest <= start {
                continue;
            }
            base += *amount;
            if rest < due {
                changes.push((rest, -*amount));
            }
        }
        if let Some((from, amount)) = self.compounded_from {
            if from <= start {
                base += amount;
            } else if from < due {
                changes.push((from, amount));
            }
        }
        changes.sort_by_key(|(date, _)| *date);

        let mut segments = vec![BalanceSegment { from: start, balance: base }];
        let mut balance = base;
        for (from, delta) in changes {
            balance += delta;
            segments.push(BalanceSegment { from, balance });
        }
        segments
    }

    fn level_periods(&self) -> u32 {
        let emitted = self.installments.len() as u32;
        let remaining = self
            .target
            .saturating_sub(emitted)
            .saturating_sub(self.pending_inserts);
        let remaining_grace = self.generator.terms.grace_on_principal.saturating_sub(emitted);
        remaining.saturating_sub(remaining_grace).max(1)
    }

    fn close_period(&mut self, kind: PeriodKind, due: NaiveDate, period: u32) -> Result<()> {
        let terms = self.generator.terms;
        let digits = terms.currency_digits;
        let start = self.period_start;

        if let Some(retained) = self.replay_head(start, due) {
            self.outstanding -= retained.principal;
            self.installments.push(retained);
            self.replayed += 1;
            self.period_start = due;
            return Ok(());
        }
        if let Some(tail) = self.tail {
            if !self.in_tail {
                self.enter_tail(tail, start)?;
            }
        }

        let rate = self.period_rate(start, due, period)?;
        let hold = std::mem::take(&mut self.hold_level);
        if self.last_rate != Some(rate) {
            if !hold {
                self.level_amount = None;
            }
            self.last_rate = Some(rate);
        }

        let interest = match terms.interest_method {
            InterestMethod::Flat => self.accrual.interest_for_period(
                rate,
                start,
                due,
                &[BalanceSegment {
                    from: start,
                    balance: self.released,
                }],
            ),
            InterestMethod::DecliningBalance => {
                let segments = self.interest_segments(start, due);
                self.accrual.interest_for_period(rate, start, due, &segments)
            }
        }
        .round_dp(digits);

        let level = match self.level_amount {
            Some(level) => level,
            None => {
                let periodic_rate = self.accrual.periodic_rate(rate);
                let level = self
                    .calculator
                    .level_amount(self.outstanding, periodic_rate, self.level_periods());
                self.level_amount = Some(level);
                level
            }
        };

        let sequence = self.installments.len() as u32 + 1;
        let (principal, is_last) = match kind {
            PeriodKind::Inserted { principal } => {
                if principal > self.outstanding {
                    return Err(self.mismatch(period, due, "inserted principal exceeds the outstanding balance"));
                }
                (principal, false)
            }
            PeriodKind::Regular => {
                let split = self.calculator.split(self.outstanding, interest, level, false);
                let repaid = split.principal >= self.outstanding && !self.tranches_pending();
                let is_last = if self.reduces_term() {
                    repaid
                } else if self.extends_last() {
                    // a prepaid balance can clear before the last held installment
                    sequence == self.target || repaid
                } else {
                    sequence == self.target
                };
                if is_last && self.tranches_pending() {
                    return Err(self.mismatch(period, due, "tranche released after the final installment starts"));
                }
                if is_last {
                    (self.outstanding, true)
                } else if sequence <= terms.grace_on_principal {
                    (Money::ZERO, false)
                } else {
                    (split.principal, false)
                }
            }
        };

        if !is_last
            && !self.reduces_term()
            && self.outstanding.is_positive()
            && principal == self.outstanding
            && !self.tranches_pending()
        {
            return Err(self.mismatch(period, due, "principal fully allocated before the installment count"));
        }

        let mut interest_due = interest;
        if sequence <= terms.grace_on_interest_payment && !is_last {
            self.deferred_interest += interest;
            interest_due = Money::ZERO;
        } else {
            interest_due += std::mem::take(&mut self.deferred_interest);
        }

        let basis = ChargeBasis {
            principal,
            interest: interest_due,
            disbursed: self.released,
        };
        let mut charges = charges_for_installment(self.generator.charges, terms.loan_id, start, due, &basis, digits);
        if let Some(tail) = self.tail {
            for (charged_on, kind, amount) in &tail.applied_charges {
                if *charged_on > start && *charged_on <= due {
                    match kind {
                        ChargeKind::Fee => charges.fees += *amount,
                        ChargeKind::Penalty => charges.penalties += *amount,
                    }
                }
            }
        }

        self.outstanding -= principal;
        let reported_principal = principal + std::mem::take(&mut self.unreported_prepaid);
        debug!(
            loan_id = %terms.loan_id,
            period = sequence,
            phase = ?self.phase,
            %start,
            %due,
            %rate,
            principal = %reported_principal,
            interest = %interest_due,
            outstanding = %self.outstanding,
            "period closed"
        );
        self.installments.push(Installment {
            sequence_number: sequence,
            from_date: start,
            due_date: due,
            principal: reported_principal,
            interest: interest_due,
            fees: charges.fees,
            penalties: charges.penalties,
            is_recalculated_interest_component: self.in_tail,
        });
        self.period_start = due;
        Ok(())
    }

    fn finish(&mut self, variations: &ClassifiedVariations) -> Result<()> {
        let emitted = self.installments.len() as u32;
        if self.tranches_pending() {
            return Err(self.mismatch(emitted, self.period_start, "tranches remain after the final installment"));
        }
        if let Some(variation) = variations.pending_structural().first() {
            return Err(self.conflict(emitted, variation.applicable_from, "variation falls after the final installment"));
        }
        if !self.outstanding.is_zero() {
            return Err(self.mismatch(emitted, self.period_start, "principal left after the final installment"));
        }
        self.phase = PassPhase::ScheduleComplete;
        debug!(loan_id = %self.generator.terms.loan_id, installments = emitted, phase = ?self.phase, "pass finished");
        Ok(())
    }

    fn conflict(&self, period: u32, date: NaiveDate, message: &str) -> ScheduleError {
        ScheduleError::InvalidVariationConflict {
            loan_id: self.generator.terms.loan_id,
            period,
            date,
            message: message.to_string(),
        }
    }

    fn mismatch(&self, period: u32, date: NaiveDate, message: &str) -> ScheduleError {
        ScheduleError::ScheduleExhaustionMismatch {
            loan_id: self.generator.terms.loan_id,
            period,
            date,
            outstanding: self.outstanding,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::borrower_cycle::{BorrowerCycleTerms, BorrowerCycleVariation, CycleTable};
    use crate::calendar::{HolidayList, WorkingDayPolicy};
    use crate::charges::{ChargeCalculation, ChargeList, ScheduledCharge};
    use crate::config::FloatingRateTerms;
    use crate::disbursement::DisbursementTranche;
    use crate::interest::{FloatingRatePeriod, FloatingRateTable};
    use crate::types::{AmortizationMethod, LoanId};
    use crate::variations::classify;
    use chrono::{TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }

    fn equal_principal_terms() -> LoanTerms {
        LoanTerms::monthly(
            LoanId::nil(),
            Money::from_major(12_000),
            Rate::from_percentage(12),
            12,
            date(2024, 1, 1),
        )
        .with_methods(InterestMethod::DecliningBalance, AmortizationMethod::EqualPrincipal)
    }

    fn generate(terms: &LoanTerms, variations: Vec<TermVariation>) -> Result<LoanSchedule> {
        let calendar = HolidayList::new();
        let mut events = EventStore::new();
        ScheduleGenerator::new(terms, &calendar).generate(
            &DisbursementPlan::default(),
            &mut classify(variations),
            &time(),
            &mut events,
        )
    }

    #[test]
    fn test_declining_equal_principal_schedule() {
        let schedule = generate(&equal_principal_terms(), Vec::new()).unwrap();

        assert_eq!(schedule.installments.len(), 12);
        assert!(schedule.installments.iter().all(|i| i.principal == Money::from_major(1_000)));
        let interest: Vec<Money> = schedule.installments.iter().map(|i| i.interest).collect();
        let expected: Vec<Money> = (1..=12).rev().map(|k| Money::from_major(k * 10)).collect();
        assert_eq!(interest, expected);
        assert_eq!(schedule.total_interest(), Money::from_major(780));
        assert_eq!(schedule.maturity_date(), Some(date(2025, 1, 1)));
    }

    #[test]
    fn test_flat_interest_schedule() {
        let terms = equal_principal_terms().with_methods(InterestMethod::Flat, AmortizationMethod::EqualInstallments);
        let schedule = generate(&terms, Vec::new()).unwrap();

        assert!(schedule.installments.iter().all(|i| i.interest == Money::from_major(120)));
        assert_eq!(schedule.total_interest(), Money::from_major(1_440));
        assert_eq!(schedule.total_principal(), Money::from_major(12_000));
    }

    #[test]
    fn test_equal_installments_sum_to_principal() {
        let terms = LoanTerms::monthly(
            LoanId::nil(),
            Money::from_major(100_000),
            Rate::from_percentage(12),
            12,
            date(2024, 1, 1),
        );
        let schedule = generate(&terms, Vec::new()).unwrap();

        let first = &schedule.installments[0];
        assert_eq!(first.interest, Money::from_major(1_000));
        assert_eq!(first.principal, Money::from_decimal(dec!(7884.88)));
        assert_eq!(schedule.total_principal(), Money::from_major(100_000));
        for pair in schedule.installments.windows(2) {
            assert!(pair[0].interest > pair[1].interest);
            assert_eq!(pair[0].due_date, pair[1].from_date);
        }
    }

    #[test]
    fn test_rate_change_settles_before_same_dated_insert() {
        let variations = vec![
            TermVariation::insert_installment(date(2024, 2, 1), Some(date(2024, 3, 15)), None),
            TermVariation::rate_change(date(2024, 2, 1), dec!(24)),
        ];
        let schedule = generate(&equal_principal_terms(), variations).unwrap();

        assert_eq!(schedule.installments.len(), 13);
        assert_eq!(schedule.installments[1].interest, Money::from_major(220));

        let inserted = &schedule.installments[2];
        assert_eq!((inserted.from_date, inserted.due_date), (date(2024, 3, 1), date(2024, 3, 15)));
        assert_eq!(inserted.principal, Money::ZERO);
        assert_eq!(inserted.interest, Money::from_major(200));

        let after = &schedule.installments[3];
        assert_eq!((after.from_date, after.due_date), (date(2024, 3, 15), date(2024, 4, 1)));
        assert_eq!(schedule.total_principal(), Money::from_major(12_000));
    }

    #[test]
    fn test_deleted_installment_folds_into_next_period() {
        let variations = vec![TermVariation::delete_installment(date(2024, 4, 1))];
        let schedule = generate(&equal_principal_terms(), variations).unwrap();

        assert_eq!(schedule.installments.len(), 11);
        let folded = &schedule.installments[2];
        assert_eq!((folded.from_date, folded.due_date), (date(2024, 3, 1), date(2024, 5, 1)));
        assert_eq!(schedule.installments[0].principal, Money::from_decimal(dec!(1090.91)));
        assert_eq!(schedule.total_principal(), Money::from_major(12_000));
        assert_eq!(schedule.maturity_date(), Some(date(2025, 1, 1)));
    }

    #[test]
    fn test_due_date_shift_reanchors_following_dates() {
        let variations = vec![TermVariation::due_date_shift(date(2024, 3, 1), date(2024, 3, 10))];
        let schedule = generate(&equal_principal_terms(), variations).unwrap();

        assert_eq!(schedule.installments[1].due_date, date(2024, 3, 10));
        assert_eq!(schedule.installments[2].due_date, date(2024, 4, 10));
        assert_eq!(schedule.maturity_date(), Some(date(2025, 1, 10)));
    }

    #[test]
    fn test_installment_specific_shift_keeps_following_dates() {
        let variations =
            vec![TermVariation::due_date_shift(date(2024, 3, 1), date(2024, 3, 10)).specific_to_installment()];
        let schedule = generate(&equal_principal_terms(), variations).unwrap();

        assert_eq!(schedule.installments[1].due_date, date(2024, 3, 10));
        assert_eq!(schedule.installments[2].from_date, date(2024, 3, 10));
        assert_eq!(schedule.installments[2].due_date, date(2024, 4, 1));
    }

    #[test]
    fn test_weekend_due_dates_move_to_next_business_day() {
        let terms = equal_principal_terms().with_working_days(WorkingDayPolicy::default());
        let calendar = HolidayList::weekends_only();
        let mut events = EventStore::new();
        let schedule = ScheduleGenerator::new(&terms, &calendar)
            .generate(&DisbursementPlan::default(), &mut classify(Vec::new()), &time(), &mut events)
            .unwrap();

        assert_eq!(schedule.installments[4].due_date, date(2024, 6, 3));
        assert_eq!(schedule.installments[5].from_date, date(2024, 6, 3));
        assert_eq!(schedule.installments[5].due_date, date(2024, 7, 1));
        assert_eq!(schedule.installments[7].due_date, date(2024, 9, 2));
        assert_eq!(schedule.installments[10].due_date, date(2024, 12, 2));
        let adjusted = events
            .events()
            .iter()
            .filter(|e| matches!(e, Event::DueDateAdjusted { .. }))
            .count();
        assert_eq!(adjusted, 3);
    }

    #[test]
    fn test_tranches_release_and_reamortize() {
        let terms = LoanTerms::monthly(
            LoanId::nil(),
            Money::from_major(10_000),
            Rate::from_percentage(12),
            6,
            date(2024, 1, 1),
        )
        .with_methods(InterestMethod::DecliningBalance, AmortizationMethod::EqualPrincipal)
        .with_multi_disbursement();
        let plan = DisbursementPlan::new(vec![
            DisbursementTranche::planned(date(2024, 1, 1), Money::from_major(6_000)),
            DisbursementTranche::planned(date(2024, 3, 1), Money::from_major(4_000)),
        ]);
        let calendar = HolidayList::new();
        let mut events = EventStore::new();
        let schedule = ScheduleGenerator::new(&terms, &calendar)
            .generate(&plan, &mut classify(Vec::new()), &time(), &mut events)
            .unwrap();

        let principal: Vec<Money> = schedule.installments.iter().map(|i| i.principal).collect();
        assert_eq!(
            principal,
            [1_000, 1_000, 2_000, 2_000, 2_000, 2_000].map(Money::from_major).to_vec()
        );
        assert_eq!(schedule.installments[2].interest, Money::from_major(80));
        assert_eq!(schedule.total_interest(), Money::from_major(310));
        assert_eq!(schedule.disbursements.len(), 2);
        assert_eq!(schedule.disbursements[0].date, date(2024, 1, 1));
        let released = events
            .events()
            .iter()
            .filter(|e| matches!(e, Event::TrancheReleased { .. }))
            .count();
        assert_eq!(released, 2);
    }

    #[test]
    fn test_tranche_inside_final_period_is_a_mismatch() {
        let terms = LoanTerms::monthly(
            LoanId::nil(),
            Money::from_major(10_000),
            Rate::from_percentage(12),
            6,
            date(2024, 1, 1),
        )
        .with_multi_disbursement();
        let plan = DisbursementPlan::new(vec![
            DisbursementTranche::planned(date(2024, 1, 1), Money::from_major(6_000)),
            DisbursementTranche::planned(date(2024, 6, 15), Money::from_major(4_000)),
        ]);
        let calendar = HolidayList::new();
        let mut events = EventStore::new();
        let err = ScheduleGenerator::new(&terms, &calendar)
            .generate(&plan, &mut classify(Vec::new()), &time(), &mut events)
            .unwrap_err();

        assert!(matches!(err, ScheduleError::ScheduleExhaustionMismatch { period: 6, .. }));
        assert!(events.events().is_empty());
    }

    #[test]
    fn test_grace_defers_principal_and_interest() {
        let terms = LoanTerms::monthly(
            LoanId::nil(),
            Money::from_major(6_000),
            Rate::from_percentage(12),
            6,
            date(2024, 1, 1),
        )
        .with_methods(InterestMethod::DecliningBalance, AmortizationMethod::EqualPrincipal)
        .with_grace(2, 1);
        let schedule = generate(&terms, Vec::new()).unwrap();

        let amounts: Vec<(Money, Money)> = schedule.installments.iter().map(|i| (i.principal, i.interest)).collect();
        let expected: Vec<(Money, Money)> = [(0, 0), (0, 120), (1_500, 60), (1_500, 45), (1_500, 30), (1_500, 15)]
            .iter()
            .map(|(p, i)| (Money::from_major(*p), Money::from_major(*i)))
            .collect();
        assert_eq!(amounts, expected);
    }

    #[test]
    fn test_floating_rate_adds_differential_to_index() {
        let terms = equal_principal_terms().with_floating_rate(FloatingRateTerms {
            differential: Rate::from_percentage(2),
            fallback_to_base_rate: false,
        });
        let table = FloatingRateTable::new(vec![FloatingRatePeriod {
            from_date: date(2023, 1, 1),
            rate: Rate::from_percentage(5),
        }]);
        let calendar = HolidayList::new();
        let mut events = EventStore::new();
        let schedule = ScheduleGenerator::new(&terms, &calendar)
            .with_floating_rates(&table)
            .generate(&DisbursementPlan::default(), &mut classify(Vec::new()), &time(), &mut events)
            .unwrap();

        assert_eq!(schedule.installments[0].interest, Money::from_major(70));
    }

    #[test]
    fn test_missing_floating_rate() {
        let strict = equal_principal_terms().with_floating_rate(FloatingRateTerms {
            differential: Rate::from_percentage(2),
            fallback_to_base_rate: false,
        });
        assert!(matches!(
            generate(&strict, Vec::new()),
            Err(ScheduleError::FloatingRateUnavailable { period: 1, .. })
        ));

        let lenient = equal_principal_terms().with_floating_rate(FloatingRateTerms {
            differential: Rate::from_percentage(2),
            fallback_to_base_rate: true,
        });
        let calendar = HolidayList::new();
        let mut events = EventStore::new();
        let schedule = ScheduleGenerator::new(&lenient, &calendar)
            .generate(&DisbursementPlan::default(), &mut classify(Vec::new()), &time(), &mut events)
            .unwrap();
        assert_eq!(schedule.installments[0].interest, Money::from_major(120));
        assert!(events.events().iter().any(|e| matches!(e, Event::FloatingRateFallback { .. })));
    }

    #[test]
    fn test_installment_fees_from_provider() {
        let terms = equal_principal_terms();
        let charges = ChargeList::new(vec![ScheduledCharge::installment_fee(ChargeCalculation::Flat(
            Money::from_major(5),
        ))]);
        let calendar = HolidayList::new();
        let mut events = EventStore::new();
        let schedule = ScheduleGenerator::new(&terms, &calendar)
            .with_charges(&charges)
            .generate(&DisbursementPlan::default(), &mut classify(Vec::new()), &time(), &mut events)
            .unwrap();

        assert_eq!(schedule.total_fees(), Money::from_major(60));
        assert_eq!(schedule.total_penalties(), Money::ZERO);
    }

    #[test]
    fn test_borrower_cycle_terms_drive_the_schedule() {
        let cycle = BorrowerCycleTerms {
            cycle_number: 3,
            principal: CycleTable::new(vec![BorrowerCycleVariation::equal(3, dec!(8000))], None),
            interest_rate: CycleTable::new(Vec::new(), Some(dec!(12))),
            number_of_repayments: CycleTable::new(Vec::new(), Some(dec!(4))),
        };
        let terms = equal_principal_terms().with_borrower_cycle(cycle);
        let schedule = generate(&terms, Vec::new()).unwrap();

        assert_eq!(schedule.installments.len(), 4);
        assert_eq!(schedule.total_principal(), Money::from_major(8_000));
        assert_eq!(schedule.installments[0].interest, Money::from_major(80));
    }

    #[test]
    fn test_insert_on_existing_due_date_conflicts() {
        let variations = vec![TermVariation::insert_installment(date(2024, 2, 15), Some(date(2024, 3, 1)), None)];
        let err = generate(&equal_principal_terms(), variations).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidVariationConflict { date: d, .. } if d == date(2024, 3, 1)));
    }

    #[test]
    fn test_shift_between_due_dates_conflicts() {
        let variations = vec![TermVariation::due_date_shift(date(2024, 2, 10), date(2024, 2, 20))];
        let err = generate(&equal_principal_terms(), variations).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidVariationConflict { period: 2, .. }));
    }

    #[test]
    fn test_oversized_insert_is_a_mismatch() {
        let variations = vec![TermVariation::insert_installment(
            date(2024, 2, 15),
            Some(date(2024, 2, 15)),
            Some(dec!(50000)),
        )];
        let err = generate(&equal_principal_terms(), variations).unwrap_err();
        assert!(matches!(err, ScheduleError::ScheduleExhaustionMismatch { .. }));
    }

    #[test]
    fn test_installment_limit() {
        let terms = equal_principal_terms();
        let calendar = HolidayList::new();
        let mut events = EventStore::new();
        let err = ScheduleGenerator::new(&terms, &calendar)
            .with_config(EngineConfig { max_installments: 6 })
            .generate(&DisbursementPlan::default(), &mut classify(Vec::new()), &time(), &mut events)
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_multi_disbursement_needs_tranches() {
        let terms = equal_principal_terms().with_multi_disbursement();
        assert!(matches!(
            generate(&terms, Vec::new()),
            Err(ScheduleError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_generation_is_repeatable() {
        let terms = equal_principal_terms();
        let calendar = HolidayList::new();
        let mut variations = classify(vec![
            TermVariation::rate_change(date(2024, 5, 1), dec!(18)),
            TermVariation::delete_installment(date(2024, 8, 1)),
        ]);
        let generator = ScheduleGenerator::new(&terms, &calendar);
        let mut events = EventStore::new();
        let first = generator
            .generate(&DisbursementPlan::default(), &mut variations, &time(), &mut events)
            .unwrap();
        let second = generator
            .generate(&DisbursementPlan::default(), &mut variations, &time(), &mut events)
            .unwrap();

        assert_eq!(first, second);
        assert!(variations.rate_changes.entries().iter().all(|v| v.is_processed));
    }
}
