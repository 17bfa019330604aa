use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ScheduleError};
use crate::types::LoanId;

/// kind of mid-life term change
///
/// variant order is the tie-break order for variations sharing an
/// applicable date: rate changes settle first and structural changes
/// last, so an insert always lands after a same-dated rate change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TermVariationKind {
    RateChange,
    RateFromInstallment,
    DeleteInstallment,
    DueDateShift,
    InsertInstallment,
}

/// one recorded change to a loan's schedule-affecting terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermVariation {
    pub kind: TermVariationKind,
    pub applicable_from: NaiveDate,
    /// new annual rate in percent, or inserted principal
    pub decimal_value: Option<Decimal>,
    /// new due date for shifts and inserts
    pub date_value: Option<NaiveDate>,
    pub is_specific_to_installment: bool,
    #[serde(default)]
    pub is_processed: bool,
}

impl TermVariation {
    fn new(kind: TermVariationKind, applicable_from: NaiveDate) -> Self {
        Self {
            kind,
            applicable_from,
            decimal_value: None,
            date_value: None,
            is_specific_to_installment: false,
            is_processed: false,
        }
    }

    pub fn rate_change(applicable_from: NaiveDate, annual_percent: Decimal) -> Self {
        Self {
            decimal_value: Some(annual_percent),
            ..Self::new(TermVariationKind::RateChange, applicable_from)
        }
    }

    pub fn rate_from_installment(applicable_from: NaiveDate, annual_percent: Decimal) -> Self {
        Self {
            decimal_value: Some(annual_percent),
            ..Self::new(TermVariationKind::RateFromInstallment, applicable_from)
        }
    }

    /// move the installment due on `applicable_from` to `new_due_date`
    pub fn due_date_shift(applicable_from: NaiveDate, new_due_date: NaiveDate) -> Self {
        Self {
            date_value: Some(new_due_date),
            ..Self::new(TermVariationKind::DueDateShift, applicable_from)
        }
    }

    pub fn insert_installment(
        applicable_from: NaiveDate,
        due_date: Option<NaiveDate>,
        principal: Option<Decimal>,
    ) -> Self {
        Self {
            date_value: due_date,
            decimal_value: principal,
            ..Self::new(TermVariationKind::InsertInstallment, applicable_from)
        }
    }

    pub fn delete_installment(applicable_from: NaiveDate) -> Self {
        Self::new(TermVariationKind::DeleteInstallment, applicable_from)
    }

    /// limit a due date shift to its own installment
    pub fn specific_to_installment(mut self) -> Self {
        self.is_specific_to_installment = true;
        self
    }

    /// due date of the installment an insert creates
    pub fn inserted_due_date(&self) -> NaiveDate {
        self.date_value.unwrap_or(self.applicable_from)
    }

    /// earliest date whose installment this variation can change
    pub fn earliest_affected_date(&self) -> NaiveDate {
        match self.kind {
            TermVariationKind::DueDateShift | TermVariationKind::InsertInstallment => {
                self.applicable_from.min(self.inserted_due_date())
            }
            _ => self.applicable_from,
        }
    }

    fn sort_key(&self) -> (NaiveDate, TermVariationKind) {
        (self.applicable_from, self.kind)
    }
}

/// ordered forward cursor over one bucket of variations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariationCursor {
    entries: Vec<TermVariation>,
    position: usize,
}

impl VariationCursor {
    fn new(entries: Vec<TermVariation>) -> Self {
        Self { entries, position: 0 }
    }

    /// peek: is the current entry applicable on or before the date
    pub fn has_variation_on_or_before(&self, date: NaiveDate) -> bool {
        self.peek().is_some_and(|v| v.applicable_from <= date)
    }

    pub fn peek(&self) -> Option<&TermVariation> {
        self.entries.get(self.position)
    }

    /// put back the most recently consumed entry
    pub(crate) fn step_back(&mut self) -> Option<&TermVariation> {
        if self.position == 0 {
            return None;
        }
        self.position -= 1;
        let entry = &mut self.entries[self.position];
        entry.is_processed = false;
        Some(entry)
    }

    pub fn entries(&self) -> &[TermVariation] {
        &self.entries
    }

    /// entries not yet consumed in this pass
    pub fn remaining(&self) -> &[TermVariation] {
        &self.entries[self.position.min(self.entries.len())..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn reset(&mut self) {
        self.position = 0;
        for entry in &mut self.entries {
            entry.is_processed = false;
        }
    }
}

impl Iterator for VariationCursor {
    type Item = TermVariation;

    /// consume the current entry and mark it processed
    fn next(&mut self) -> Option<TermVariation> {
        let entry = self.entries.get_mut(self.position)?;
        entry.is_processed = true;
        self.position += 1;
        Some(entry.clone())
    }
}

/// term variations partitioned into per-kind cursors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedVariations {
    pub rate_changes: VariationCursor,
    pub rates_from_installment: VariationCursor,
    pub due_date_shifts: VariationCursor,
    pub inserts: VariationCursor,
    pub deletes: VariationCursor,
}

/// sort and bucket a raw variation list
pub fn classify(variations: Vec<TermVariation>) -> ClassifiedVariations {
    let mut sorted = variations;
    sorted.sort_by_key(TermVariation::sort_key);

    let mut buckets: BTreeMap<TermVariationKind, Vec<TermVariation>> = BTreeMap::new();
    for variation in sorted {
        buckets.entry(variation.kind).or_default().push(variation);
    }
    let mut take = |kind: TermVariationKind| buckets.remove(&kind).unwrap_or_default();

    let mut rate_changes = take(TermVariationKind::RateChange);
    let mut rates_from_installment = take(TermVariationKind::RateFromInstallment);
    let mut due_date_shifts = take(TermVariationKind::DueDateShift);
    let inserts = take(TermVariationKind::InsertInstallment);
    let deletes = take(TermVariationKind::DeleteInstallment);

    for bucket in [&mut rate_changes, &mut rates_from_installment, &mut due_date_shifts] {
        bucket.sort_by_key(|v| v.applicable_from);
    }

    ClassifiedVariations {
        rate_changes: VariationCursor::new(rate_changes),
        rates_from_installment: VariationCursor::new(rates_from_installment),
        due_date_shifts: VariationCursor::new(due_date_shifts),
        inserts: VariationCursor::new(inserts),
        deletes: VariationCursor::new(deletes),
    }
}

impl ClassifiedVariations {
    fn cursors(&self) -> [&VariationCursor; 5] {
        [
            &self.rate_changes,
            &self.rates_from_installment,
            &self.due_date_shifts,
            &self.inserts,
            &self.deletes,
        ]
    }

    /// rewind every cursor and clear processed flags
    pub fn reset(&mut self) {
        for cursor in [
            &mut self.rate_changes,
            &mut self.rates_from_installment,
            &mut self.due_date_shifts,
            &mut self.inserts,
            &mut self.deletes,
        ] {
            cursor.reset();
        }
    }

    /// unconsumed inserts minus unconsumed deletes
    pub fn adjust_installment_count(&self) -> i64 {
        self.inserts.remaining().len() as i64 - self.deletes.remaining().len() as i64
    }

    /// roll the due-date cursor back one step
    pub fn previous(&mut self) -> Option<&TermVariation> {
        self.due_date_shifts.step_back()
    }

    /// consume the earliest rate variation applicable on or before the date
    pub fn next_rate_on_or_before(&mut self, date: NaiveDate) -> Option<TermVariation> {
        let from_change = self.rate_changes.peek().filter(|v| v.applicable_from <= date);
        let from_installment = self
            .rates_from_installment
            .peek()
            .filter(|v| v.applicable_from <= date);
        match (from_change, from_installment) {
            (Some(a), Some(b)) if b.applicable_from < a.applicable_from => {
                self.rates_from_installment.next()
            }
            (Some(_), _) => self.rate_changes.next(),
            (None, Some(_)) => self.rates_from_installment.next(),
            (None, None) => None,
        }
    }

    /// structural entries left unconsumed at the end of a pass
    pub fn pending_structural(&self) -> Vec<&TermVariation> {
        let mut pending: Vec<&TermVariation> = self
            .due_date_shifts
            .remaining()
            .iter()
            .chain(self.inserts.remaining())
            .chain(self.deletes.remaining())
            .collect();
        pending.sort_by_key(|v| v.sort_key());
        pending
    }

    pub fn is_empty(&self) -> bool {
        self.cursors().iter().all(|c| c.is_empty())
    }

    /// every entry, consumed or not, for reclassification
    pub fn to_vec(&self) -> Vec<TermVariation> {
        self.cursors()
            .iter()
            .flat_map(|c| c.entries().iter().cloned())
            .collect()
    }

    /// structural variations that can never both be honored
    pub fn detect_conflicts(&self, loan_id: LoanId) -> Result<()> {
        for insert in self.inserts.entries() {
            if let Some(due) = insert.date_value {
                if due < insert.applicable_from {
                    return Err(ScheduleError::InvalidVariationConflict {
                        loan_id,
                        period: 0,
                        date: insert.applicable_from,
                        message: format!("inserted installment due {due} precedes its applicable date"),
                    });
                }
            }
            let target = insert.inserted_due_date();
            if self.deletes.entries().iter().any(|d| d.applicable_from == target) {
                return Err(ScheduleError::InvalidVariationConflict {
                    loan_id,
                    period: 0,
                    date: target,
                    message: "insert and delete target the same date".to_string(),
                });
            }
        }
        for shift in self.due_date_shifts.entries() {
            if shift.date_value.is_none() {
                return Err(ScheduleError::InvalidVariationConflict {
                    loan_id,
                    period: 0,
                    date: shift.applicable_from,
                    message: "due date shift without a new due date".to_string(),
                });
            }
            if self.deletes.entries().iter().any(|d| d.applicable_from == shift.applicable_from) {
                return Err(ScheduleError::InvalidVariationConflict {
                    loan_id,
                    period: 0,
                    date: shift.applicable_from,
                    message: "due date shift targets a deleted installment".to_string(),
                });
            }
        }
        Ok(())
    }
}
