//! # Criteria Values
//!
//! The observation store of one document: one `RecordList` per criterion,
//! keyed by handle.
//!
//! The store carries a shared handle to its guideline so that any expression
//! can be evaluated with nothing but `&CriteriaValues`. A criterion without
//! records reads as its *undefined* sentinel: the full `[min, max]` range for
//! numerical criteria, the empty set for categorical ones.

use crate::model::{Criterion, Guideline};
use crate::primitives::{CRITERION_DEFAULT_MAX, CRITERION_DEFAULT_MIN};
use crate::records::{DataRecord, RecordList};
use crate::types::{
    CriterionId, DataSelection, DataSource, PathwayError, Range, Timestamp, Value,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Per-document observation store.
#[derive(Debug)]
pub struct CriteriaValues {
    guideline: Arc<Guideline>,
    numerical: BTreeMap<CriterionId, RecordList<Range>>,
    categorical: BTreeMap<CriterionId, RecordList<Vec<String>>>,
    /// Last `recorded_at` issued by this store.
    last_recorded: Timestamp,
    /// Criteria whose undefined range is being computed. Bounds may read
    /// each other, so a re-entrant request falls back to the defaults.
    resolving: RefCell<BTreeSet<CriterionId>>,
}

impl Clone for CriteriaValues {
    fn clone(&self) -> Self {
        Self {
            guideline: Arc::clone(&self.guideline),
            numerical: self.numerical.clone(),
            categorical: self.categorical.clone(),
            last_recorded: self.last_recorded,
            resolving: RefCell::new(BTreeSet::new()),
        }
    }
}

impl CriteriaValues {
    /// Create an empty store for the given guideline.
    #[must_use]
    pub fn new(guideline: Arc<Guideline>) -> Self {
        Self {
            guideline,
            numerical: BTreeMap::new(),
            categorical: BTreeMap::new(),
            last_recorded: Timestamp::default(),
            resolving: RefCell::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn guideline(&self) -> &Guideline {
        &self.guideline
    }

    #[must_use]
    pub const fn shared_guideline(&self) -> &Arc<Guideline> {
        &self.guideline
    }

    /// An empty store over the same guideline.
    #[must_use]
    pub fn emptied(&self) -> Self {
        Self::new(Arc::clone(&self.guideline))
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Append a record.
    ///
    /// `recorded_at` defaults to a store-issued timestamp that is strictly
    /// greater than every timestamp issued before. A categorical write
    /// replaces a lone empty record.
    ///
    /// # Errors
    ///
    /// `UnknownCriterion` for a foreign handle, `KindMismatch` when the value
    /// kind does not match the criterion.
    pub fn add(
        &mut self,
        criterion: CriterionId,
        value: Value,
        source: DataSource,
        measured_at: Option<Timestamp>,
        recorded_at: Option<Timestamp>,
    ) -> Result<(), PathwayError> {
        let is_numerical = self.guideline.require_criterion(criterion)?.is_numerical();
        let recorded_at = self.issue_timestamp(recorded_at);
        match (value, is_numerical) {
            (Value::Numerical(range), true) => {
                self.numerical
                    .entry(criterion)
                    .or_default()
                    .add(DataRecord::new(range, source, measured_at, recorded_at));
            }
            (Value::Categorical(names), false) => {
                let list = self.categorical.entry(criterion).or_default();
                let lone = if list.len() == 1 {
                    list.iter().next().cloned()
                } else {
                    None
                };
                if let Some(lone) = lone
                    && lone.value().is_empty()
                {
                    list.remove(&lone);
                }
                list.add(DataRecord::new(names, source, measured_at, recorded_at));
            }
            (_, numerical) => {
                return Err(PathwayError::KindMismatch {
                    criterion,
                    expected: if numerical { "numerical" } else { "categorical" },
                });
            }
        }
        Ok(())
    }

    /// Append the undefined sentinel of a criterion.
    ///
    /// # Errors
    ///
    /// `UnknownCriterion` for a foreign handle.
    pub fn add_undefined(
        &mut self,
        criterion: CriterionId,
        source: DataSource,
        measured_at: Option<Timestamp>,
    ) -> Result<(), PathwayError> {
        let value = self.undefined_value(criterion)?;
        self.add(criterion, value, source, measured_at, None)
    }

    /// Replace the record the default selection currently returns.
    pub(crate) fn overwrite_latest(
        &mut self,
        criterion: CriterionId,
        value: Value,
        source: DataSource,
        measured_at: Option<Timestamp>,
    ) -> Result<(), PathwayError> {
        if let Some(latest) = self.stored_record(criterion, DataSelection::LatestEntryCreatedTime) {
            self.remove_record(criterion, &latest);
        }
        self.add(criterion, value, source, measured_at, None)
    }

    /// Remove one record. Returns whether it was present.
    pub fn remove_record(&mut self, criterion: CriterionId, record: &DataRecord<Value>) -> bool {
        let removed = match record.value() {
            Value::Numerical(range) => self.numerical.get_mut(&criterion).is_some_and(|list| {
                list.remove(&DataRecord::new(
                    *range,
                    record.source(),
                    record.measured_at(),
                    record.recorded_at(),
                ))
            }),
            Value::Categorical(names) => self.categorical.get_mut(&criterion).is_some_and(|list| {
                list.remove(&DataRecord::new(
                    names.clone(),
                    record.source(),
                    record.measured_at(),
                    record.recorded_at(),
                ))
            }),
        };
        self.drop_empty(criterion);
        removed
    }

    /// Remove every record holding `value`. Returns how many were removed.
    pub fn remove_value(&mut self, criterion: CriterionId, value: &Value) -> usize {
        let removed = match value {
            Value::Numerical(range) => self
                .numerical
                .get_mut(&criterion)
                .map_or(0, |list| list.remove_value(range)),
            Value::Categorical(names) => self
                .categorical
                .get_mut(&criterion)
                .map_or(0, |list| list.remove_value(names)),
        };
        self.drop_empty(criterion);
        removed
    }

    /// Drop every record of a criterion.
    pub fn clear(&mut self, criterion: CriterionId) {
        self.numerical.remove(&criterion);
        self.categorical.remove(&criterion);
    }

    fn drop_empty(&mut self, criterion: CriterionId) {
        if self.numerical.get(&criterion).is_some_and(RecordList::is_empty) {
            self.numerical.remove(&criterion);
        }
        if self.categorical.get(&criterion).is_some_and(RecordList::is_empty) {
            self.categorical.remove(&criterion);
        }
    }

    fn issue_timestamp(&mut self, requested: Option<Timestamp>) -> Timestamp {
        let issued = requested.unwrap_or_else(|| {
            let now = Timestamp::now();
            if now > self.last_recorded {
                now
            } else {
                self.last_recorded.successor()
            }
        });
        self.last_recorded = self.last_recorded.max(issued);
        issued
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Collapse the history of a criterion into one record.
    ///
    /// Returns `None` only for a foreign handle; a criterion without records
    /// yields its undefined sentinel with source `NotSet`.
    #[must_use]
    pub fn get_record(
        &self,
        criterion: CriterionId,
        selection: DataSelection,
    ) -> Option<DataRecord<Value>> {
        let target = self.guideline.criterion(criterion)?;
        if target.is_numerical() {
            let record = match self.numerical.get(&criterion) {
                Some(list) => list.select(selection, Range::point(f64::NAN)),
                None => return Some(self.undefined_record(target)),
            };
            if record.source() == DataSource::NotSet {
                return Some(self.undefined_record(target));
            }
            Some(record.map(Value::Numerical))
        } else {
            let record = self
                .categorical
                .get(&criterion)
                .map(|list| list.select(selection, target.categories()))
                .unwrap_or_else(|| {
                    DataRecord::new(Vec::new(), DataSource::NotSet, None, Timestamp::default())
                });
            Some(record.map(Value::Categorical))
        }
    }

    /// The value of [`CriteriaValues::get_record`].
    #[must_use]
    pub fn get_value(&self, criterion: CriterionId, selection: DataSelection) -> Option<Value> {
        self.get_record(criterion, selection).map(DataRecord::into_value)
    }

    /// Numeric read; `None` for a foreign or categorical criterion.
    #[must_use]
    pub fn numerical(&self, criterion: CriterionId, selection: DataSelection) -> Option<Range> {
        match self.get_value(criterion, selection)? {
            Value::Numerical(range) => Some(range),
            Value::Categorical(_) => None,
        }
    }

    /// Categorical read; empty for a foreign or numerical criterion.
    #[must_use]
    pub fn categorical(&self, criterion: CriterionId, selection: DataSelection) -> Vec<String> {
        match self.get_value(criterion, selection) {
            Some(Value::Categorical(names)) => names,
            _ => Vec::new(),
        }
    }

    /// A record actually held by the store, never a synthesized sentinel.
    fn stored_record(
        &self,
        criterion: CriterionId,
        selection: DataSelection,
    ) -> Option<DataRecord<Value>> {
        self.get_record(criterion, selection)
            .filter(|record| record.source() != DataSource::NotSet)
    }

    /// Every record of a criterion, newest first.
    #[must_use]
    pub fn records(&self, criterion: CriterionId) -> Vec<DataRecord<Value>> {
        if let Some(list) = self.numerical.get(&criterion) {
            return list.iter().cloned().map(|record| record.map(Value::Numerical)).collect();
        }
        self.categorical.get(&criterion).map_or_else(Vec::new, |list| {
            list.iter().cloned().map(|record| record.map(Value::Categorical)).collect()
        })
    }

    /// Whether any record exists for the criterion.
    #[must_use]
    pub fn has(&self, criterion: CriterionId) -> bool {
        self.numerical.contains_key(&criterion) || self.categorical.contains_key(&criterion)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.numerical.is_empty() && self.categorical.is_empty()
    }

    /// Criteria holding real information, in handle order.
    #[must_use]
    pub fn set_criteria(&self) -> Vec<CriterionId> {
        self.numerical
            .keys()
            .chain(self.categorical.keys())
            .copied()
            .filter(|criterion| !self.is_undefined(*criterion))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether the criterion carries no information under the default
    /// selection.
    #[must_use]
    pub fn is_undefined(&self, criterion: CriterionId) -> bool {
        self.is_undefined_with(criterion, DataSelection::default())
    }

    /// Whether the criterion carries no information under `selection`.
    ///
    /// A numeric value is undefined when it equals the criterion's undefined
    /// range; a categorical value when it is empty or lists every declared
    /// value.
    #[must_use]
    pub fn is_undefined_with(&self, criterion: CriterionId, selection: DataSelection) -> bool {
        let Some(target) = self.guideline.criterion(criterion) else {
            return true;
        };
        if !self.has(criterion) {
            return true;
        }
        if target.is_numerical() {
            let Some(range) = self.numerical(criterion, selection) else {
                return true;
            };
            if range.is_degenerate() {
                return false;
            }
            range.same_endpoints(&self.undefined_range_of(target))
                || range.same_endpoints(&self.emptied().undefined_range_of(target))
        } else {
            let names = self.categorical(criterion, selection);
            names.is_empty() || names.len() == target.categories().len()
        }
    }

    /// `[min.low, max.high]` under the current values, with the engine
    /// defaults for missing bounds.
    #[must_use]
    pub fn undefined_range(&self, criterion: CriterionId) -> Option<Range> {
        let target = self.guideline.criterion(criterion)?;
        target.is_numerical().then(|| self.undefined_range_of(target))
    }

    fn undefined_range_of(&self, target: &Criterion) -> Range {
        let id = target.id();
        if !self.resolving.borrow_mut().insert(id) {
            return Range::new(CRITERION_DEFAULT_MIN, CRITERION_DEFAULT_MAX);
        }
        let range = target.bounds_or_default(self);
        self.resolving.borrow_mut().remove(&id);
        range
    }

    fn undefined_record(&self, target: &Criterion) -> DataRecord<Value> {
        DataRecord::new(
            Value::Numerical(self.undefined_range_of(target)),
            DataSource::NotSet,
            None,
            Timestamp::default(),
        )
    }

    /// The undefined sentinel value of a criterion.
    ///
    /// # Errors
    ///
    /// `UnknownCriterion` for a foreign handle.
    pub fn undefined_value(&self, criterion: CriterionId) -> Result<Value, PathwayError> {
        let target = self.guideline.require_criterion(criterion)?;
        Ok(if target.is_numerical() {
            Value::Numerical(self.undefined_range_of(target))
        } else {
            Value::Categorical(Vec::new())
        })
    }

    /// Record-by-record comparison with another store under `selection`.
    #[must_use]
    pub fn same_as(&self, other: &Self, selection: DataSelection) -> bool {
        let keys: BTreeSet<CriterionId> = self
            .numerical
            .keys()
            .chain(self.categorical.keys())
            .chain(other.numerical.keys())
            .chain(other.categorical.keys())
            .copied()
            .collect();
        keys.into_iter().all(|criterion| {
            match (self.get_value(criterion, selection), other.get_value(criterion, selection)) {
                (Some(a), Some(b)) => a.same_as(&b),
                (None, None) => true,
                _ => false,
            }
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Numerical;
    use crate::model::GuidelineBuilder;

    struct Fixture {
        values: CriteriaValues,
        dose: CriterionId,
        limit: CriterionId,
        site: CriterionId,
    }

    fn fixture() -> Fixture {
        let mut builder = GuidelineBuilder::new("store");
        let dose = builder.numerical_criterion("dose", false, 0.0, 50.0);
        let limit = builder.numerical_criterion("limit", false, 10.0, 40.0);
        let site = builder.categorical_criterion("site", ["left", "right"]);
        builder.set_bounds(dose, Numerical::constant(0.0), Numerical::criterion(limit));
        let guideline = Arc::new(builder.build().expect("valid guideline"));
        Fixture {
            values: CriteriaValues::new(guideline),
            dose,
            limit,
            site,
        }
    }

    #[test]
    fn unset_criteria_read_as_sentinels() {
        let fixture = fixture();
        let values = &fixture.values;
        assert_eq!(
            values.numerical(fixture.limit, DataSelection::default()),
            Some(Range::new(10.0, 40.0))
        );
        // the upper bound of dose reads limit, itself undefined
        assert_eq!(values.undefined_range(fixture.dose), Some(Range::new(0.0, 40.0)));
        assert!(values.categorical(fixture.site, DataSelection::default()).is_empty());
        assert!(values.is_undefined(fixture.dose));
        assert!(values.set_criteria().is_empty());
    }

    #[test]
    fn bounds_follow_other_criteria() {
        let mut fixture = fixture();
        fixture
            .values
            .add(fixture.limit, Value::number(20.0), DataSource::Manual, None, None)
            .expect("value accepted");
        assert_eq!(fixture.values.undefined_range(fixture.dose), Some(Range::new(0.0, 20.0)));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut fixture = fixture();
        let result = fixture.values.add(
            fixture.site,
            Value::number(1.0),
            DataSource::Manual,
            None,
            None,
        );
        assert!(matches!(result, Err(PathwayError::KindMismatch { .. })));
        let result = fixture.values.add(
            CriterionId(99),
            Value::number(1.0),
            DataSource::Manual,
            None,
            None,
        );
        assert!(matches!(result, Err(PathwayError::UnknownCriterion(_))));
    }

    #[test]
    fn issued_timestamps_increase() {
        let mut fixture = fixture();
        for value in [1.0, 2.0, 3.0] {
            fixture
                .values
                .add(fixture.limit, Value::number(value), DataSource::Manual, None, None)
                .expect("value accepted");
        }
        let records = fixture.values.records(fixture.limit);
        assert_eq!(records.len(), 3);
        assert!(records[0].recorded_at() > records[1].recorded_at());
        assert!(records[1].recorded_at() > records[2].recorded_at());
        assert_eq!(
            fixture.values.numerical(fixture.limit, DataSelection::default()),
            Some(Range::point(3.0))
        );
    }

    #[test]
    fn lone_empty_categorical_is_replaced() {
        let mut fixture = fixture();
        fixture
            .values
            .add_undefined(fixture.site, DataSource::Unknown, None)
            .expect("sentinel accepted");
        fixture
            .values
            .add(fixture.site, Value::categories(["left"]), DataSource::Manual, None, None)
            .expect("value accepted");
        assert_eq!(fixture.values.records(fixture.site).len(), 1);
        assert!(!fixture.values.is_undefined(fixture.site));

        fixture
            .values
            .add(
                fixture.site,
                Value::categories(["left", "right"]),
                DataSource::Manual,
                None,
                None,
            )
            .expect("value accepted");
        // every declared value at once carries no information
        assert!(fixture.values.is_undefined(fixture.site));
    }

    #[test]
    fn overwrite_replaces_latest_record() {
        let mut fixture = fixture();
        fixture
            .values
            .add(fixture.limit, Value::number(15.0), DataSource::Manual, None, None)
            .expect("value accepted");
        fixture
            .values
            .overwrite_latest(fixture.limit, Value::number(25.0), DataSource::Inferred, None)
            .expect("value accepted");
        let records = fixture.values.records(fixture.limit);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source(), DataSource::Inferred);
    }

    #[test]
    fn remove_and_compare() {
        let mut fixture = fixture();
        let snapshot = fixture.values.clone();
        fixture
            .values
            .add(fixture.limit, Value::number(15.0), DataSource::Manual, None, None)
            .expect("value accepted");
        assert!(!fixture.values.same_as(&snapshot, DataSelection::default()));
        assert_eq!(fixture.values.set_criteria(), vec![fixture.limit]);

        let record = fixture.values.records(fixture.limit).remove(0);
        assert!(fixture.values.remove_record(fixture.limit, &record));
        assert!(!fixture.values.has(fixture.limit));
        assert!(fixture.values.same_as(&snapshot, DataSelection::default()));
    }

    #[test]
    fn mutual_bounds_do_not_recurse_forever() {
        let mut builder = GuidelineBuilder::new("cycle");
        let a = builder.numerical_criterion("a", false, 0.0, 10.0);
        let b = builder.numerical_criterion("b", false, 0.0, 10.0);
        builder.set_bounds(a, Numerical::constant(0.0), Numerical::criterion(b));
        builder.set_bounds(b, Numerical::constant(0.0), Numerical::criterion(a));
        let values = CriteriaValues::new(Arc::new(builder.build().expect("valid guideline")));
        let range = values.undefined_range(a).expect("numerical criterion");
        assert_eq!(range.start(), 0.0);
        assert!(range.end() <= CRITERION_DEFAULT_MAX);
    }
}
