//! # Record Lists
//!
//! Time-stamped observation history of one criterion.
//!
//! A `RecordList` keeps two sequences, each sorted on every insert by binary
//! search:
//! - records with a measurement time, ascending by `measured_at`
//! - records without one, ascending by `recorded_at`
//!
//! Iteration is newest first: unmeasured records from the end, then measured
//! records from the end. Collapsing the history into a single record is
//! driven by `DataSelection`.

use crate::arithmetic::{NumericalOperator, evaluate_arithmetic};
use crate::types::{DataSelection, DataSource, NumericValue, Range, Timestamp, same_categories};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// DATA RECORD
// =============================================================================

/// One observation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord<V> {
    value: V,
    source: DataSource,
    measured_at: Option<Timestamp>,
    recorded_at: Timestamp,
}

impl<V> DataRecord<V> {
    #[must_use]
    pub const fn new(
        value: V,
        source: DataSource,
        measured_at: Option<Timestamp>,
        recorded_at: Timestamp,
    ) -> Self {
        Self {
            value,
            source,
            measured_at,
            recorded_at,
        }
    }

    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    #[must_use]
    pub const fn source(&self) -> DataSource {
        self.source
    }

    #[must_use]
    pub const fn measured_at(&self) -> Option<Timestamp> {
        self.measured_at
    }

    #[must_use]
    pub const fn recorded_at(&self) -> Timestamp {
        self.recorded_at
    }

    /// Convert the value, keeping provenance and timestamps.
    #[must_use]
    pub fn map<W>(self, convert: impl FnOnce(V) -> W) -> DataRecord<W> {
        DataRecord {
            value: convert(self.value),
            source: self.source,
            measured_at: self.measured_at,
            recorded_at: self.recorded_at,
        }
    }
}

/// Value types a record list can hold.
pub trait RecordValue: Clone + PartialEq {
    /// Equality as seen by the engine: endpoints for ranges, set membership
    /// for category lists.
    fn same_value(&self, other: &Self) -> bool;
}

impl RecordValue for Range {
    fn same_value(&self, other: &Self) -> bool {
        self.same_endpoints(other)
    }
}

impl RecordValue for Vec<String> {
    fn same_value(&self, other: &Self) -> bool {
        same_categories(self, other)
    }
}

// =============================================================================
// RECORD LIST
// =============================================================================

/// The record history of a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordList<V> {
    measured: Vec<DataRecord<V>>,
    unmeasured: Vec<DataRecord<V>>,
}

impl<V> Default for RecordList<V> {
    fn default() -> Self {
        Self {
            measured: Vec::new(),
            unmeasured: Vec::new(),
        }
    }
}

impl<V: RecordValue> RecordList<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert after every record with an equal sort key.
    pub fn add(&mut self, record: DataRecord<V>) {
        match record.measured_at {
            Some(measured_at) => {
                let index = self
                    .measured
                    .partition_point(|existing| existing.measured_at <= Some(measured_at));
                self.measured.insert(index, record);
            }
            None => {
                let index = self
                    .unmeasured
                    .partition_point(|existing| existing.recorded_at <= record.recorded_at);
                self.unmeasured.insert(index, record);
            }
        }
    }

    /// Remove the first record equal to `record`.
    pub fn remove(&mut self, record: &DataRecord<V>) -> bool {
        let sequence = if record.measured_at.is_some() {
            &mut self.measured
        } else {
            &mut self.unmeasured
        };
        match sequence.iter().position(|existing| existing == record) {
            Some(index) => {
                sequence.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every record holding `value`.
    pub fn remove_value(&mut self, value: &V) -> usize {
        let before = self.len();
        self.measured.retain(|record| !record.value.same_value(value));
        self.unmeasured.retain(|record| !record.value.same_value(value));
        before - self.len()
    }

    #[must_use]
    pub fn has_value(&self, value: &V) -> bool {
        self.iter().any(|record| record.value.same_value(value))
    }

    /// Move a record to new timestamps. Records are immutable, so this
    /// removes it and inserts a copy.
    pub fn change_time(
        &mut self,
        record: &DataRecord<V>,
        measured_at: Option<Timestamp>,
        recorded_at: Timestamp,
    ) -> bool {
        if !self.remove(record) {
            return false;
        }
        self.add(DataRecord::new(
            record.value.clone(),
            record.source,
            measured_at,
            recorded_at,
        ));
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.measured.len() + self.unmeasured.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.measured.is_empty() && self.unmeasured.is_empty()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &DataRecord<V>> {
        self.unmeasured.iter().rev().chain(self.measured.iter().rev())
    }

    /// Pairwise comparison of two histories in iteration order.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().zip(other.iter()).all(|(a, b)| {
                a.value.same_value(&b.value)
                    && a.source == b.source
                    && a.measured_at == b.measured_at
                    && a.recorded_at == b.recorded_at
            })
    }

    /// The positional selections shared by both value kinds.
    fn positional(&self, selection: DataSelection) -> Option<&DataRecord<V>> {
        match selection {
            DataSelection::Oldest => self.measured.first().or_else(|| self.unmeasured.first()),
            DataSelection::LatestEntryCreatedTime => {
                match (self.measured.last(), self.unmeasured.last()) {
                    (Some(measured), Some(unmeasured))
                        if unmeasured.recorded_at > measured.recorded_at =>
                    {
                        Some(unmeasured)
                    }
                    (Some(measured), _) => Some(measured),
                    (None, unmeasured) => unmeasured,
                }
            }
            DataSelection::OldestEntryCreatedTime => {
                match (self.measured.first(), self.unmeasured.first()) {
                    (Some(measured), Some(unmeasured))
                        if unmeasured.recorded_at < measured.recorded_at =>
                    {
                        Some(unmeasured)
                    }
                    (Some(measured), _) => Some(measured),
                    (None, unmeasured) => unmeasured,
                }
            }
            _ => self.measured.last().or_else(|| self.unmeasured.last()),
        }
    }

    fn combined(&self, value: V, sample: &DataRecord<V>) -> DataRecord<V> {
        DataRecord::new(value, DataSource::Combined, None, sample.recorded_at)
    }
}

// =============================================================================
// NUMERIC AGGREGATION
// =============================================================================

impl RecordList<Range> {
    /// Collapse the history into one record.
    ///
    /// An empty list yields `undefined` with source `NotSet`.
    #[must_use]
    pub fn select(&self, selection: DataSelection, undefined: Range) -> DataRecord<Range> {
        let Some(sample) = self.positional(selection) else {
            return DataRecord::new(undefined, DataSource::NotSet, None, Timestamp::default());
        };
        match selection {
            DataSelection::Latest
            | DataSelection::Oldest
            | DataSelection::LatestEntryCreatedTime
            | DataSelection::OldestEntryCreatedTime => sample.clone(),
            DataSelection::Union => self.fold(sample, NumericalOperator::Union),
            DataSelection::Intersection => self.fold(sample, NumericalOperator::Intersection),
            DataSelection::Min => self.fold(sample, NumericalOperator::Min),
            DataSelection::Max => self.fold(sample, NumericalOperator::Max),
            DataSelection::Mean => {
                if self.len() <= 1 {
                    return sample.clone();
                }
                let sum: f64 = self.iter().map(|record| record.value.mean()).sum();
                let mean = sum / self.len() as f64;
                self.combined(Range::point(mean), sample)
            }
            DataSelection::Median => {
                if self.len() <= 1 {
                    return sample.clone();
                }
                let mut sorted: Vec<&DataRecord<Range>> = self.iter().collect();
                sorted.sort_by(|a, b| a.value.mean().total_cmp(&b.value.mean()));
                sorted[(sorted.len() - 1) / 2].clone()
            }
            DataSelection::Mode => {
                let mut counts: Vec<(Range, usize)> = Vec::new();
                for record in self.iter() {
                    match counts
                        .iter_mut()
                        .find(|(range, _)| range.same_endpoints(&record.value))
                    {
                        Some((_, count)) => *count += 1,
                        None => counts.push((record.value, 1)),
                    }
                }
                let mut best: Option<(Range, usize)> = None;
                for (range, count) in counts {
                    if best.is_none_or(|(_, top)| count > top) {
                        best = Some((range, count));
                    }
                }
                match best {
                    Some((range, _)) => self.combined(range, sample),
                    None => sample.clone(),
                }
            }
        }
    }

    /// Fold every record into the sample with `op`. A single record, or a
    /// fold that runs empty, yields the sample itself.
    fn fold(&self, sample: &DataRecord<Range>, op: NumericalOperator) -> DataRecord<Range> {
        if self.len() <= 1 {
            return sample.clone();
        }
        let mut result = Some(NumericValue::Interval(sample.value));
        let mut skipped_sample = false;
        for record in self.iter() {
            if !skipped_sample && record == sample {
                skipped_sample = true;
                continue;
            }
            result = evaluate_arithmetic(result, op, Some(NumericValue::Interval(record.value)));
        }
        match result {
            Some(value) if !value.is_indeterminate() => self.combined(value.to_range(), sample),
            _ => sample.clone(),
        }
    }
}

// =============================================================================
// CATEGORICAL AGGREGATION
// =============================================================================

impl RecordList<Vec<String>> {
    /// Collapse the history into one record, using `declared` as the
    /// criterion's value order.
    ///
    /// An empty list yields the empty set with source `NotSet`.
    #[must_use]
    pub fn select(&self, selection: DataSelection, declared: &[String]) -> DataRecord<Vec<String>> {
        let Some(sample) = self.positional(selection) else {
            return DataRecord::new(Vec::new(), DataSource::NotSet, None, Timestamp::default());
        };
        match selection {
            DataSelection::Latest
            | DataSelection::Oldest
            | DataSelection::LatestEntryCreatedTime
            | DataSelection::OldestEntryCreatedTime => sample.clone(),
            DataSelection::Union => {
                let mut union: Vec<String> = Vec::new();
                for value in self.iter().flat_map(|record| record.value.iter()) {
                    if !union.contains(value) {
                        union.push(value.clone());
                    }
                }
                self.combined(in_declared_order(union, declared), sample)
            }
            DataSelection::Intersection => {
                let mut intersection = sample.value.clone();
                for record in self.iter() {
                    intersection.retain(|value| record.value.contains(value));
                }
                self.combined(in_declared_order(intersection, declared), sample)
            }
            DataSelection::Min
            | DataSelection::Max
            | DataSelection::Mean
            | DataSelection::Median => {
                if self.len() <= 1 {
                    return sample.clone();
                }
                self.combined(self.ordinal(selection, declared), sample)
            }
            DataSelection::Mode => {
                if self.len() <= 1 {
                    return sample.clone();
                }
                let mut counts: BTreeMap<&String, usize> = BTreeMap::new();
                for value in self.iter().flat_map(|record| record.value.iter()) {
                    *counts.entry(value).or_default() += 1;
                }
                let top = counts.values().copied().max().unwrap_or(0);
                let modes: Vec<String> = counts
                    .into_iter()
                    .filter(|(_, count)| *count == top)
                    .map(|(value, _)| value.clone())
                    .collect();
                self.combined(in_declared_order(modes, declared), sample)
            }
        }
    }

    /// Min, max, mean or median over the ordinal positions of every observed
    /// value. An undeclared value makes the result empty.
    fn ordinal(&self, selection: DataSelection, declared: &[String]) -> Vec<String> {
        let mut ordinals = Vec::new();
        for value in self.iter().flat_map(|record| record.value.iter()) {
            match declared.iter().position(|candidate| candidate == value) {
                Some(ordinal) => ordinals.push(ordinal),
                None => return Vec::new(),
            }
        }
        if ordinals.is_empty() {
            return Vec::new();
        }
        let index = match selection {
            DataSelection::Min => ordinals.iter().copied().min(),
            DataSelection::Max => ordinals.iter().copied().max(),
            DataSelection::Mean => {
                let sum: usize = ordinals.iter().sum();
                let mean = (sum as f64 / ordinals.len() as f64).round();
                declared
                    .iter()
                    .enumerate()
                    .map(|(ordinal, _)| ordinal)
                    .find(|ordinal| *ordinal as f64 == mean)
            }
            _ => {
                ordinals.sort_unstable();
                ordinals.get((ordinals.len() - 1) / 2).copied()
            }
        };
        index
            .and_then(|index| declared.get(index))
            .map(|value| vec![value.clone()])
            .unwrap_or_default()
    }
}

/// Order `values` as declared; undeclared leftovers keep their order at the
/// end.
fn in_declared_order(values: Vec<String>, declared: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = declared
        .iter()
        .filter(|candidate| values.contains(candidate))
        .cloned()
        .collect();
    for value in values {
        if !ordered.contains(&value) {
            ordered.push(value);
        }
    }
    ordered
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(value: f64, recorded: i64) -> DataRecord<Range> {
        DataRecord::new(
            Range::point(value),
            DataSource::Manual,
            None,
            Timestamp(recorded),
        )
    }

    fn measured(value: f64, measured: i64, recorded: i64) -> DataRecord<Range> {
        DataRecord::new(
            Range::point(value),
            DataSource::Manual,
            Some(Timestamp(measured)),
            Timestamp(recorded),
        )
    }

    fn categories(values: &[&str], recorded: i64) -> DataRecord<Vec<String>> {
        DataRecord::new(
            values.iter().map(|value| (*value).to_string()).collect(),
            DataSource::Manual,
            None,
            Timestamp(recorded),
        )
    }

    fn declared() -> Vec<String> {
        ["A", "B", "C"].iter().map(|value| (*value).to_string()).collect()
    }

    fn undefined() -> Range {
        Range::new(0.0, 999.0)
    }

    fn list(records: Vec<DataRecord<Range>>) -> RecordList<Range> {
        let mut list = RecordList::new();
        for record in records {
            list.add(record);
        }
        list
    }

    #[test]
    fn empty_list_yields_undefined_record() {
        let list = RecordList::<Range>::new();
        let record = list.select(DataSelection::default(), undefined());
        assert_eq!(record.value(), &undefined());
        assert_eq!(record.source(), DataSource::NotSet);
    }

    #[test]
    fn insertion_keeps_order() {
        let list = list(vec![
            measured(3.0, 30, 1),
            measured(1.0, 10, 2),
            measured(2.0, 20, 3),
            numeric(9.0, 5),
            numeric(8.0, 4),
        ]);
        let order: Vec<f64> = list.iter().map(|record| record.value().start()).collect();
        assert_eq!(order, vec![9.0, 8.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn positional_selections() {
        let list = list(vec![measured(1.0, 10, 5), measured(2.0, 20, 1), numeric(3.0, 3)]);
        let pick = |selection| list.select(selection, undefined()).value().start();
        assert_eq!(pick(DataSelection::Latest), 2.0);
        assert_eq!(pick(DataSelection::Oldest), 1.0);
        // latest measured record was recorded at 1, the unmeasured one at 3
        assert_eq!(pick(DataSelection::LatestEntryCreatedTime), 3.0);
        // heads of both sequences: recorded at 5 against recorded at 3
        assert_eq!(pick(DataSelection::OldestEntryCreatedTime), 3.0);
    }

    #[test]
    fn mean_of_midpoints() {
        let list = list(vec![numeric(1.0, 1), numeric(3.0, 2)]);
        let record = list.select(DataSelection::Mean, undefined());
        assert!(record.value().same_endpoints(&Range::point(2.0)));
        assert_eq!(record.source(), DataSource::Combined);
    }

    #[test]
    fn median_takes_middle_record() {
        let list = list(vec![numeric(5.0, 1), numeric(1.0, 2), numeric(3.0, 3)]);
        let record = list.select(DataSelection::Median, undefined());
        assert_eq!(record.value().start(), 3.0);

        let even = self::list(vec![numeric(4.0, 1), numeric(2.0, 2)]);
        assert_eq!(even.select(DataSelection::Median, undefined()).value().start(), 2.0);
    }

    #[test]
    fn mode_prefers_most_recent_on_ties() {
        let list = list(vec![numeric(1.0, 1), numeric(2.0, 2)]);
        let record = list.select(DataSelection::Mode, undefined());
        assert_eq!(record.value().start(), 2.0);

        let repeated = self::list(vec![numeric(1.0, 1), numeric(1.0, 2), numeric(2.0, 3)]);
        assert_eq!(repeated.select(DataSelection::Mode, undefined()).value().start(), 1.0);
    }

    #[test]
    fn union_and_intersection_fold_ranges() {
        let list = list(vec![
            DataRecord::new(Range::new(1.0, 5.0), DataSource::Manual, None, Timestamp(1)),
            DataRecord::new(Range::new(3.0, 8.0), DataSource::Manual, None, Timestamp(2)),
        ]);
        let union = list.select(DataSelection::Union, undefined());
        assert!(union.value().same_endpoints(&Range::new(1.0, 8.0)));
        let intersection = list.select(DataSelection::Intersection, undefined());
        assert!(intersection.value().same_endpoints(&Range::new(3.0, 5.0)));
        assert_eq!(intersection.source(), DataSource::Combined);
    }

    #[test]
    fn empty_intersection_falls_back_to_latest() {
        let list = list(vec![numeric(1.0, 1), numeric(2.0, 2)]);
        let record = list.select(DataSelection::Intersection, undefined());
        assert_eq!(record.value().start(), 2.0);
        assert_eq!(record.source(), DataSource::Manual);
    }

    #[test]
    fn remove_and_change_time() {
        let mut list = list(vec![numeric(1.0, 1), numeric(2.0, 2)]);
        let first = numeric(1.0, 1);
        assert!(list.change_time(&first, Some(Timestamp(50)), Timestamp(1)));
        assert_eq!(list.select(DataSelection::Latest, undefined()).value().start(), 1.0);
        assert!(!list.remove(&first));
        assert_eq!(list.remove_value(&Range::point(2.0)), 1);
        assert_eq!(list.len(), 1);
        assert!(list.has_value(&Range::point(1.0)));
    }

    #[test]
    fn categorical_mode_returns_all_ties() {
        let mut list = RecordList::new();
        list.add(categories(&["A"], 1));
        list.add(categories(&["A"], 2));
        list.add(categories(&["B"], 3));
        let record = list.select(DataSelection::Mode, &declared());
        assert_eq!(record.value(), &vec!["A".to_string()]);

        list.add(categories(&["B"], 4));
        let record = list.select(DataSelection::Mode, &declared());
        assert_eq!(record.value(), &vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn categorical_union_uses_declared_order() {
        let mut list = RecordList::new();
        list.add(categories(&["C", "X"], 1));
        list.add(categories(&["A"], 2));
        let record = list.select(DataSelection::Union, &declared());
        assert_eq!(record.value(), &vec!["A".to_string(), "C".to_string(), "X".to_string()]);
    }

    #[test]
    fn categorical_intersection() {
        let mut list = RecordList::new();
        list.add(categories(&["A", "B"], 1));
        list.add(categories(&["B", "C"], 2));
        let record = list.select(DataSelection::Intersection, &declared());
        assert_eq!(record.value(), &vec!["B".to_string()]);
    }

    #[test]
    fn categorical_ordinals() {
        let mut list = RecordList::new();
        list.add(categories(&["A"], 1));
        list.add(categories(&["C"], 2));
        let pick = |selection| list.select(selection, &declared()).into_value();
        assert_eq!(pick(DataSelection::Min), vec!["A".to_string()]);
        assert_eq!(pick(DataSelection::Max), vec!["C".to_string()]);
        assert_eq!(pick(DataSelection::Mean), vec!["B".to_string()]);
        assert_eq!(pick(DataSelection::Median), vec!["A".to_string()]);
    }

    #[test]
    fn categorical_ordinal_with_unknown_value_is_empty() {
        let mut list = RecordList::new();
        list.add(categories(&["A"], 1));
        list.add(categories(&["Z"], 2));
        let record = list.select(DataSelection::Max, &declared());
        assert!(record.value().is_empty());
        assert_eq!(record.source(), DataSource::Combined);
    }
}
