//! # Propagation
//!
//! Bounded propagation of one criterion edit through every dependent
//! criterion.
//!
//! Writing a value re-evaluates all other criterion statuses against a
//! snapshot of the store. Each status whose selection changed is written back
//! as an inferred value, which starts another round. Rounds are bounded by
//! the round budget, which is what terminates circular definitions.
//!
//! The rounds are driven by an explicit worklist instead of recursion. The
//! processing order is depth-first: a changed dependent is fully propagated
//! before its next sibling, highest priority first.

use crate::model::{Criterion, Guideline};
use crate::primitives::MAX_UPDATE_ROUNDS_CRITERIA_VALUES;
use crate::status::CriterionStatus;
use crate::types::{
    CriterionId, DataSelection, DataSource, PathwayError, Range, StateId, Timestamp, Value,
};
use crate::values::CriteriaValues;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Summary of one propagated edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Criteria written during the propagation, in order of first write.
    pub changed: Vec<CriterionId>,
    /// Number of writes, the initial one included.
    pub writes: usize,
    /// Deepest round reached. The initial write is round zero.
    pub rounds_used: usize,
    /// A ripple was dropped because the round budget ran out.
    pub budget_exhausted: bool,
    /// Confirmed states of all tracked groups after the refresh. Left empty
    /// by implementors without state groups.
    pub confirmed_states: Vec<StateId>,
}

impl PropagationReport {
    /// Whether the edit was a no-op.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        self.writes == 0
    }

    fn record_write(&mut self, criterion: CriterionId, round: usize) {
        self.writes += 1;
        self.rounds_used = self.rounds_used.max(round);
        if !self.changed.contains(&criterion) {
            self.changed.push(criterion);
        }
    }
}

// =============================================================================
// INFERENCER TRAIT
// =============================================================================

/// A document that owns a value store and one status per criterion.
///
/// Implementors supply storage access and the state refresh hook; the edit
/// algorithm itself is provided.
pub trait Inferencer {
    fn criteria_values(&self) -> &CriteriaValues;

    fn criteria_values_mut(&mut self) -> &mut CriteriaValues;

    fn criterion_status(&self, criterion: CriterionId) -> Option<&CriterionStatus>;

    fn criterion_status_mut(&mut self, criterion: CriterionId) -> Option<&mut CriterionStatus>;

    /// Called once per propagated write, after the criterion's own status
    /// has been refreshed. Implementors re-evaluate their state groups here.
    fn after_criterion_changed(&mut self, criterion: CriterionId);

    /// Round budget for one edit.
    fn max_update_rounds(&self) -> usize {
        MAX_UPDATE_ROUNDS_CRITERIA_VALUES
    }

    /// Write a value for a criterion and propagate it to every dependent.
    ///
    /// Numerical values are clamped into the criterion's bounds and rounded
    /// when the criterion is integral. Re-submitting the latest value with
    /// the same measurement time changes nothing.
    ///
    /// # Errors
    ///
    /// `UnknownCriterion` for a foreign handle, `KindMismatch` when the value
    /// kind does not match the criterion.
    fn update_criterion_value(
        &mut self,
        criterion: CriterionId,
        value: Value,
        source: DataSource,
        measured_at: Option<Timestamp>,
    ) -> Result<PropagationReport, PathwayError> {
        let guideline = Arc::clone(self.criteria_values().shared_guideline());
        guideline.require_criterion(criterion)?;

        let rounds = self.max_update_rounds();
        debug!(
            criterion = guideline.criterion(criterion).map_or("?", |c| c.name()),
            ?source,
            rounds,
            "propagating criterion value"
        );
        let mut run = Propagation {
            guideline,
            rounds,
            dont_update_range: BTreeSet::new(),
            suppress_range_to_scalar: BTreeSet::from([criterion]),
            report: PropagationReport::default(),
        };
        let mut tasks = vec![Task::Update(PendingUpdate {
            criterion,
            value,
            source,
            measured_at,
            overwrite: false,
            rounds_left: rounds,
        })];

        while let Some(task) = tasks.pop() {
            match task {
                Task::Update(update) => run.apply(self, update, &mut tasks)?,
                Task::Finalize {
                    criterion,
                    preliminary,
                    refreshed,
                } => {
                    if !refreshed
                        && let Some(status) = self.criterion_status_mut(criterion)
                    {
                        status.update_bounds_and_value(
                            &preliminary,
                            &mut run.dont_update_range,
                            &run.suppress_range_to_scalar,
                        );
                    }
                    self.after_criterion_changed(criterion);
                }
            }
        }

        debug!(
            criterion = run.guideline.criterion(criterion).map_or("?", |c| c.name()),
            writes = run.report.writes,
            rounds = run.report.rounds_used,
            "criterion value propagated"
        );
        Ok(run.report)
    }
}

// =============================================================================
// WORKLIST
// =============================================================================

#[derive(Debug)]
struct PendingUpdate {
    criterion: CriterionId,
    value: Value,
    source: DataSource,
    measured_at: Option<Timestamp>,
    overwrite: bool,
    rounds_left: usize,
}

#[derive(Debug)]
enum Task {
    Update(PendingUpdate),
    /// Runs after every update the write at this level triggered.
    Finalize {
        criterion: CriterionId,
        preliminary: CriteriaValues,
        refreshed: bool,
    },
}

/// Bookkeeping shared by all rounds of one edit.
struct Propagation {
    guideline: Arc<Guideline>,
    rounds: usize,
    /// Criteria that may not be widened into a range during this edit.
    dont_update_range: BTreeSet<CriterionId>,
    /// Criteria that keep range mode when their candidate is a point.
    suppress_range_to_scalar: BTreeSet<CriterionId>,
    report: PropagationReport,
}

impl Propagation {
    fn apply<I: Inferencer + ?Sized>(
        &mut self,
        doc: &mut I,
        update: PendingUpdate,
        tasks: &mut Vec<Task>,
    ) -> Result<(), PathwayError> {
        let PendingUpdate {
            criterion,
            value,
            source,
            measured_at,
            overwrite,
            rounds_left,
        } = update;
        let guideline = Arc::clone(&self.guideline);
        let definition = guideline.require_criterion(criterion)?;
        let value = normalize(definition, value, doc.criteria_values());

        let store = doc.criteria_values_mut();
        let latest = store.get_record(criterion, DataSelection::LatestEntryCreatedTime);
        if let Some(latest) = &latest
            && latest.value().same_as(&value)
            && latest.measured_at() == measured_at
        {
            debug!(
                criterion = definition.name(),
                overwrite,
                rounds_left,
                "value unchanged, propagation skipped"
            );
            return Ok(());
        }

        if overwrite
            && !store.is_undefined(criterion)
            && latest.is_some_and(|latest| latest.source() != DataSource::NotSet)
        {
            store.overwrite_latest(criterion, value, source, measured_at)?;
        } else {
            store.add(criterion, value, source, measured_at, None)?;
        }
        let round = self.rounds - rounds_left;
        self.report.record_write(criterion, round);
        trace!(criterion = definition.name(), round, ?source, "value written");

        let mut preliminary = store.clone();
        let mut changed = self.update_dependents(doc, criterion, &mut preliminary)?;

        let mut refreshed = false;
        if changed.is_empty() && self.dependencies_selected(doc, criterion, &preliminary) {
            if let Some(status) = doc.criterion_status_mut(criterion) {
                let status_changed = status.update_bounds_and_value(
                    &preliminary,
                    &mut self.dont_update_range,
                    &self.suppress_range_to_scalar,
                );
                // a stored value the status rejects is replaced by the status value
                let corrected = status.value(&preliminary);
                let disagrees = preliminary
                    .get_value(criterion, DataSelection::default())
                    .is_some_and(|stored| !stored.same_as(&corrected));
                if disagrees && (status_changed || definition.conditional_value().is_some()) {
                    trace!(
                        criterion = definition.name(),
                        value = ?corrected,
                        "criterion corrected"
                    );
                    preliminary.add(
                        criterion,
                        corrected.clone(),
                        DataSource::Inferred,
                        None,
                        None,
                    )?;
                    changed.push((criterion, corrected));
                }
            }
            refreshed = true;
        }

        let ripple = if rounds_left > 0 {
            changed
        } else {
            if !changed.is_empty() {
                warn!(
                    criterion = definition.name(),
                    dropped = changed.len(),
                    "round budget exhausted, remaining updates dropped"
                );
                self.report.budget_exhausted = true;
            }
            Vec::new()
        };

        tasks.push(Task::Finalize {
            criterion,
            preliminary,
            refreshed,
        });
        // pushed lowest priority first, so the highest priority pops first
        for (dependent, value) in ripple {
            tasks.push(Task::Update(PendingUpdate {
                criterion: dependent,
                value,
                source: DataSource::Inferred,
                measured_at: None,
                overwrite: true,
                rounds_left: rounds_left - 1,
            }));
        }
        Ok(())
    }

    /// Re-evaluate every other status against the snapshot, unset statuses
    /// first, each in reverse priority order. Changed selections are written
    /// into the snapshot immediately so later statuses see them.
    ///
    /// Returns the changed criteria, lowest priority first.
    fn update_dependents<I: Inferencer + ?Sized>(
        &mut self,
        doc: &mut I,
        criterion: CriterionId,
        preliminary: &mut CriteriaValues,
    ) -> Result<Vec<(CriterionId, Value)>, PathwayError> {
        let (unset, set): (Vec<CriterionId>, Vec<CriterionId>) = self
            .guideline
            .criteria_by_priority()
            .iter()
            .rev()
            .copied()
            .filter(|other| *other != criterion)
            .partition(|other| !doc.criterion_status(*other).is_some_and(CriterionStatus::is_set));

        let mut changed = Vec::new();
        for other in unset.into_iter().chain(set) {
            let Some(status) = doc.criterion_status_mut(other) else {
                continue;
            };
            if !status.update_bounds_and_value(
                preliminary,
                &mut self.dont_update_range,
                &self.suppress_range_to_scalar,
            ) {
                continue;
            }
            let value = status.value(preliminary);
            trace!(criterion = other.0, value = ?value, "dependent criterion changed");
            preliminary.add(other, value.clone(), DataSource::Inferred, None, None)?;
            changed.push((other, value));
        }
        Ok(changed)
    }

    /// Whether every criterion the conditional value reads has a selection.
    fn dependencies_selected<I: Inferencer + ?Sized>(
        &self,
        doc: &I,
        criterion: CriterionId,
        values: &CriteriaValues,
    ) -> bool {
        self.guideline
            .criterion(criterion)
            .and_then(|definition| definition.conditional_value())
            .is_none_or(|conditional| {
                conditional.depends_on(values).iter().all(|dependency| {
                    doc.criterion_status(*dependency)
                        .is_some_and(|status| status.selected().is_some())
                })
            })
    }
}

/// Clamp a numerical value into the criterion's current bounds and round it
/// when the criterion is integral. Categorical values pass through.
fn normalize(criterion: &Criterion, value: Value, values: &CriteriaValues) -> Value {
    let Value::Numerical(range) = value else {
        return value;
    };
    if !criterion.is_numerical() {
        return Value::Numerical(range);
    }
    let low = criterion.lower_bound(values).unwrap_or(f64::NEG_INFINITY);
    let high = criterion.upper_bound(values).unwrap_or(f64::INFINITY);
    let clamp = |endpoint: f64| {
        let mut endpoint = endpoint;
        if endpoint < low {
            endpoint = low;
        }
        if endpoint > high {
            endpoint = high;
        }
        if criterion.is_integral() {
            endpoint = endpoint.round();
        }
        endpoint
    };
    Value::Numerical(Range::new(clamp(range.start()), clamp(range.end())))
}

// =============================================================================
// TESTS
// =============================================================================
