//! # Document
//!
//! One patient case evaluated against one guideline.
//!
//! A `Document` owns the value store, one `CriterionStatus` per criterion and
//! one `StateGroupStatus` per tracked group (main group first, then side
//! groups). It is the concrete `Inferencer`: every edit is propagated and the
//! group statuses are refreshed after each propagated write.

use crate::config::EngineConfig;
use crate::model::Guideline;
use crate::propagation::{Inferencer, PropagationReport};
use crate::state::StateGroupStatus;
use crate::status::{CriterionStatus, Selected};
use crate::types::{
    CriterionId, DataSource, NumericValue, PathwayError, StateGroupId, StateId, Timestamp, Value,
};
use crate::values::CriteriaValues;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// A patient case: store, statuses and derived state.
#[derive(Debug, Clone)]
pub struct Document {
    values: CriteriaValues,
    statuses: BTreeMap<CriterionId, CriterionStatus>,
    group_statuses: Vec<StateGroupStatus>,
    config: EngineConfig,
}

impl Document {
    /// Create a document with the default configuration.
    #[must_use]
    pub fn new(guideline: Arc<Guideline>) -> Self {
        Self::build(guideline, EngineConfig::default())
    }

    /// Create a document with an explicit configuration.
    ///
    /// # Errors
    ///
    /// `Config` when the configuration fails validation.
    pub fn with_config(
        guideline: Arc<Guideline>,
        config: EngineConfig,
    ) -> Result<Self, PathwayError> {
        config.validate()?;
        Ok(Self::build(guideline, config))
    }

    fn build(guideline: Arc<Guideline>, config: EngineConfig) -> Self {
        let mut values = CriteriaValues::new(guideline);
        let statuses = initial_statuses(&mut values);
        let group_statuses = values
            .guideline()
            .tracked_groups()
            .map(|group| {
                let is_side = values.guideline().main_group() != Some(group);
                StateGroupStatus::new(group, is_side)
            })
            .collect();
        let mut document = Self {
            values,
            statuses,
            group_statuses,
            config,
        };
        document.refresh_groups();
        debug!(
            guideline = document.guideline().name(),
            criteria = document.statuses.len(),
            groups = document.group_statuses.len(),
            "document created"
        );
        document
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn guideline(&self) -> &Guideline {
        self.values.guideline()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn values(&self) -> &CriteriaValues {
        &self.values
    }

    #[must_use]
    pub fn status(&self, criterion: CriterionId) -> Option<&CriterionStatus> {
        self.statuses.get(&criterion)
    }

    /// Group statuses, main group first.
    #[must_use]
    pub fn group_statuses(&self) -> &[StateGroupStatus] {
        &self.group_statuses
    }

    #[must_use]
    pub fn group_status(&self, group: StateGroupId) -> Option<&StateGroupStatus> {
        self.group_statuses.iter().find(|status| status.group() == group)
    }

    #[must_use]
    pub fn main_group_status(&self) -> Option<&StateGroupStatus> {
        self.group_statuses.iter().find(|status| !status.is_side_group())
    }

    /// Confirmed states of every tracked group, main group first.
    #[must_use]
    pub fn confirmed_states(&self) -> Vec<StateId> {
        self.group_statuses
            .iter()
            .flat_map(|status| status.confirmed_states().iter().copied())
            .collect()
    }

    /// Value of a state group rounded to the configured precision.
    ///
    /// # Errors
    ///
    /// `UnknownStateGroup` for a foreign handle.
    pub fn group_value(&self, group: StateGroupId) -> Result<Option<NumericValue>, PathwayError> {
        let group = self
            .guideline()
            .state_group(group)
            .ok_or(PathwayError::UnknownStateGroup(group))?;
        Ok(group.rounded_value(&self.values, self.config.rounding_precision))
    }

    /// Value of a state rounded to the configured precision.
    ///
    /// # Errors
    ///
    /// `UnknownState` for a foreign handle.
    pub fn state_value(&self, state: StateId) -> Result<Option<NumericValue>, PathwayError> {
        let state = self
            .guideline()
            .state(state)
            .ok_or(PathwayError::UnknownState(state))?;
        Ok(state.rounded_value(&self.values, self.config.rounding_precision))
    }

    // =========================================================================
    // EDITS
    // =========================================================================

    /// Write a value and propagate it. The report lists the confirmed states
    /// after the refresh.
    ///
    /// # Errors
    ///
    /// `UnknownCriterion` or `KindMismatch`, see
    /// [`Inferencer::update_criterion_value`].
    pub fn update_criterion_value(
        &mut self,
        criterion: CriterionId,
        value: Value,
        source: DataSource,
        measured_at: Option<Timestamp>,
    ) -> Result<PropagationReport, PathwayError> {
        let mut report =
            Inferencer::update_criterion_value(self, criterion, value, source, measured_at)?;
        report.confirmed_states = self.confirmed_states();
        Ok(report)
    }

    /// Clear a criterion's selection and propagate its undefined sentinel.
    ///
    /// # Errors
    ///
    /// `UnknownCriterion` for a foreign handle.
    pub fn reset_criterion(
        &mut self,
        criterion: CriterionId,
    ) -> Result<PropagationReport, PathwayError> {
        let guideline = Arc::clone(self.values.shared_guideline());
        let definition = guideline.require_criterion(criterion)?;
        if let Some(status) = self.statuses.get_mut(&criterion) {
            status.reset(definition);
        }
        let undefined = self.values.undefined_value(criterion)?;
        debug!(criterion = definition.name(), "criterion reset");
        self.update_criterion_value(criterion, undefined, DataSource::NotSet, None)
    }

    /// Replace the whole store, then rebuild every status from it.
    ///
    /// # Errors
    ///
    /// `InvalidGuideline` when the store belongs to another guideline.
    pub fn set_criteria_values(&mut self, values: CriteriaValues) -> Result<(), PathwayError> {
        if !Arc::ptr_eq(values.shared_guideline(), self.values.shared_guideline()) {
            return Err(PathwayError::InvalidGuideline(
                "criteria values belong to another guideline".to_string(),
            ));
        }
        self.values = values;
        let mut statuses = initial_statuses(&mut self.values);
        let mut dont_update_range = BTreeSet::new();
        for criterion in self.values.guideline().criteria_by_priority().iter().rev() {
            if let Some(status) = statuses.get_mut(criterion) {
                status.update_bounds_and_value(
                    &self.values,
                    &mut dont_update_range,
                    &BTreeSet::new(),
                );
            }
        }
        self.statuses = statuses;
        self.refresh_groups();
        debug!(criteria = self.values.set_criteria().len(), "criteria values replaced");
        Ok(())
    }

    fn refresh_groups(&mut self) {
        for status in &mut self.group_statuses {
            status.update(&self.values);
        }
    }
}

/// One status per criterion. Bounds that already collapse to a point are
/// seeded into an unset store.
fn initial_statuses(values: &mut CriteriaValues) -> BTreeMap<CriterionId, CriterionStatus> {
    let guideline = Arc::clone(values.shared_guideline());
    let mut statuses = BTreeMap::new();
    for criterion in guideline.criteria() {
        let status = CriterionStatus::new(criterion, values);
        if let Some(Selected::Number(value)) = status.selected()
            && !values.has(criterion.id())
            && let Err(error) =
                values.add(criterion.id(), Value::number(*value), DataSource::Unknown, None, None)
        {
            warn!(criterion = criterion.name(), %error, "fixed value not seeded");
        }
        statuses.insert(criterion.id(), status);
    }
    statuses
}

impl Inferencer for Document {
    fn criteria_values(&self) -> &CriteriaValues {
        &self.values
    }

    fn criteria_values_mut(&mut self) -> &mut CriteriaValues {
        &mut self.values
    }

    fn criterion_status(&self, criterion: CriterionId) -> Option<&CriterionStatus> {
        self.statuses.get(&criterion)
    }

    fn criterion_status_mut(&mut self, criterion: CriterionId) -> Option<&mut CriterionStatus> {
        self.statuses.get_mut(&criterion)
    }

    fn after_criterion_changed(&mut self, _criterion: CriterionId) {
        self.refresh_groups();
    }

    fn max_update_rounds(&self) -> usize {
        self.config.max_update_rounds
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Condition, Numerical};
    use crate::logic::Comparator;
    use crate::model::{GuidelineBuilder, StateConfirmation};
    use crate::types::{DataSelection, Range};

    struct Fixture {
        guideline: Arc<Guideline>,
        score: CriterionId,
        fixed: CriterionId,
        low: StateId,
        high: StateId,
        group: StateGroupId,
    }

    fn fixture() -> Fixture {
        let mut builder = GuidelineBuilder::new("triage");
        let score = builder.numerical_criterion("score", true, 0.0, 10.0);
        let fixed = builder.numerical_criterion("fixed", false, 4.0, 4.0);
        let low = builder.state_with_value(
            "low",
            Condition::criterion_compare(score, Comparator::Less, 5.0),
            Numerical::constant(1.234),
        );
        let high = builder.state(
            "high",
            Condition::criterion_compare(score, Comparator::GreaterEq, 5.0),
        );
        let group = builder.state_group(
            "risk",
            vec![low, high],
            StateConfirmation::CurrentlyConfirmed,
        );
        builder.set_main_group(group);
        Fixture {
            guideline: Arc::new(builder.build().expect("valid guideline")),
            score,
            fixed,
            low,
            high,
            group,
        }
    }

    #[test]
    fn collapsed_bounds_are_seeded() {
        let fixture = fixture();
        let document = Document::new(Arc::clone(&fixture.guideline));
        let record = document
            .values()
            .get_record(fixture.fixed, DataSelection::default())
            .expect("known criterion");
        assert_eq!(record.source(), DataSource::Unknown);
        assert_eq!(record.value(), &Value::number(4.0));
    }

    #[test]
    fn update_confirms_states() {
        let fixture = fixture();
        let mut document = Document::new(Arc::clone(&fixture.guideline));
        assert!(document.confirmed_states().is_empty());

        let report = document
            .update_criterion_value(fixture.score, Value::number(3.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        assert_eq!(report.confirmed_states, vec![fixture.low]);
        assert_eq!(
            document.group_value(fixture.group).expect("known group"),
            Some(NumericValue::Scalar(1.23))
        );

        document
            .update_criterion_value(fixture.score, Value::number(8.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        let status = document.main_group_status().expect("main group tracked");
        assert_eq!(status.confirmed_states(), &[fixture.high]);
    }

    #[test]
    fn reset_returns_to_undefined() {
        let fixture = fixture();
        let mut document = Document::new(Arc::clone(&fixture.guideline));
        document
            .update_criterion_value(fixture.score, Value::number(3.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        document.reset_criterion(fixture.score).expect("reset succeeds");

        assert!(document.values().is_undefined(fixture.score));
        assert!(!document.status(fixture.score).expect("status exists").is_set());
        assert!(document.confirmed_states().is_empty());
    }

    #[test]
    fn replaced_store_refreshes_statuses() {
        let fixture = fixture();
        let mut document = Document::new(Arc::clone(&fixture.guideline));
        let mut values = CriteriaValues::new(Arc::clone(&fixture.guideline));
        values
            .add(fixture.score, Value::Numerical(Range::new(6.0, 6.0)), DataSource::Pdf, None, None)
            .expect("value accepted");
        document.set_criteria_values(values).expect("same guideline");

        assert_eq!(
            document.status(fixture.score).expect("status exists").selected(),
            Some(&Selected::Number(6.0))
        );
        assert_eq!(document.confirmed_states(), vec![fixture.high]);
    }

    #[test]
    fn foreign_store_is_rejected() {
        let first = fixture();
        let other = fixture();
        let mut document = Document::new(Arc::clone(&first.guideline));
        let result = document.set_criteria_values(CriteriaValues::new(other.guideline));
        assert!(matches!(result, Err(PathwayError::InvalidGuideline(_))));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let fixture = fixture();
        let config = EngineConfig {
            max_update_rounds: 0,
            ..EngineConfig::default()
        };
        assert!(Document::with_config(fixture.guideline, config).is_err());
    }
}
