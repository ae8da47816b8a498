//! # Guideline Model
//!
//! The structural side of a guideline: criteria, states and state groups,
//! stored in one arena and addressed by handle.
//!
//! A `Guideline` is assembled with a `GuidelineBuilder` and is immutable
//! afterward. `build()` runs the one-time graph walk that fills in the
//! back-references (`State::group`, `Criterion::containing_states`) and the
//! evaluation order of criteria, then validates what can be cheaply checked.
//!
//! Wrap the result in an `Arc` to share it between documents.

use crate::expression::{Condition, ConditionalNumerical, Numerical};
use crate::primitives::{CRITERION_DEFAULT_MAX, CRITERION_DEFAULT_MIN};
use crate::types::{CriterionId, PathwayError, Range, StateGroupId, StateId};
use crate::values::CriteriaValues;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// CRITERION
// =============================================================================

/// Shape of a criterion's values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CriterionKind {
    /// A numeric value bounded by two expressions.
    Numerical {
        integral: bool,
        min: Numerical,
        max: Numerical,
    },
    /// One or more names out of a declared, ordered list.
    Categorical { values: Vec<String> },
}

/// Categorical values that become ineligible while a condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueExclusion {
    pub values: Vec<String>,
    pub excluding_condition: Condition,
}

/// A top-level state whose condition (transitively) reads a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateMembership {
    pub state: StateId,
    pub group: StateGroupId,
}

/// A named, typed clinical data field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    id: CriterionId,
    name: String,
    kind: CriterionKind,
    conditional_value: Option<ConditionalNumerical>,
    exclusions: Vec<ValueExclusion>,
    containing_states: Vec<StateMembership>,
}

impl Criterion {
    #[must_use]
    pub const fn id(&self) -> CriterionId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> &CriterionKind {
        &self.kind
    }

    #[must_use]
    pub const fn is_numerical(&self) -> bool {
        matches!(self.kind, CriterionKind::Numerical { .. })
    }

    #[must_use]
    pub const fn is_categorical(&self) -> bool {
        matches!(self.kind, CriterionKind::Categorical { .. })
    }

    /// Whether values must be rounded to integers. Always false for
    /// categorical criteria.
    #[must_use]
    pub const fn is_integral(&self) -> bool {
        match &self.kind {
            CriterionKind::Numerical { integral, .. } => *integral,
            CriterionKind::Categorical { .. } => false,
        }
    }

    /// The declared category names, empty for numerical criteria.
    #[must_use]
    pub fn categories(&self) -> &[String] {
        match &self.kind {
            CriterionKind::Numerical { .. } => &[],
            CriterionKind::Categorical { values } => values,
        }
    }

    #[must_use]
    pub const fn min(&self) -> Option<&Numerical> {
        match &self.kind {
            CriterionKind::Numerical { min, .. } => Some(min),
            CriterionKind::Categorical { .. } => None,
        }
    }

    #[must_use]
    pub const fn max(&self) -> Option<&Numerical> {
        match &self.kind {
            CriterionKind::Numerical { max, .. } => Some(max),
            CriterionKind::Categorical { .. } => None,
        }
    }

    /// The lower end of the `min` expression under the given values.
    #[must_use]
    pub fn lower_bound(&self, values: &CriteriaValues) -> Option<f64> {
        self.min()?.value_low(values)
    }

    /// The upper end of the `max` expression under the given values.
    #[must_use]
    pub fn upper_bound(&self, values: &CriteriaValues) -> Option<f64> {
        self.max()?.value_high(values)
    }

    /// `[min, max]`, with the engine defaults standing in for missing bounds.
    #[must_use]
    pub fn bounds_or_default(&self, values: &CriteriaValues) -> Range {
        Range::new(
            self.lower_bound(values).unwrap_or(CRITERION_DEFAULT_MIN),
            self.upper_bound(values).unwrap_or(CRITERION_DEFAULT_MAX),
        )
    }

    /// The conditional expression that derives this criterion's value.
    #[must_use]
    pub const fn conditional_value(&self) -> Option<&ConditionalNumerical> {
        self.conditional_value.as_ref()
    }

    #[must_use]
    pub fn exclusions(&self) -> &[ValueExclusion] {
        &self.exclusions
    }

    /// Top-level states whose conditions read this criterion.
    #[must_use]
    pub fn containing_states(&self) -> &[StateMembership] {
        &self.containing_states
    }
}

// =============================================================================
// STATES
// =============================================================================

/// A named clinical situation, confirmed by its condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    id: StateId,
    name: String,
    condition: Condition,
    numerical: Option<Numerical>,
    group: Option<StateGroupId>,
}

impl State {
    #[must_use]
    pub const fn id(&self) -> StateId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn condition(&self) -> &Condition {
        &self.condition
    }

    /// The value this state contributes when it is the selected state.
    #[must_use]
    pub const fn numerical(&self) -> Option<&Numerical> {
        self.numerical.as_ref()
    }

    /// The owning group, if the state belongs to one.
    #[must_use]
    pub const fn group(&self) -> Option<StateGroupId> {
        self.group
    }
}

/// How many states of a group may be confirmed at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StateConfirmation {
    /// Only the highest-priority possible state, and only once no
    /// higher-priority state is undecided.
    #[default]
    StrictByPriority,
    /// The first `True` state in priority order.
    CurrentlyConfirmed,
    /// Every `True` state.
    AllConfirmed,
}

/// An ordered set of mutually related states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateGroup {
    id: StateGroupId,
    name: String,
    states: Vec<StateId>,
    states_by_priority: Vec<StateId>,
    confirmation: StateConfirmation,
}

impl StateGroup {
    #[must_use]
    pub const fn id(&self) -> StateGroupId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// States in display order.
    #[must_use]
    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    /// States in evaluation order; display order unless set explicitly.
    #[must_use]
    pub fn states_by_priority(&self) -> &[StateId] {
        if self.states_by_priority.is_empty() {
            &self.states
        } else {
            &self.states_by_priority
        }
    }

    #[must_use]
    pub const fn confirmation(&self) -> StateConfirmation {
        self.confirmation
    }

    #[must_use]
    pub fn contains(&self, state: StateId) -> bool {
        self.states.contains(&state)
    }
}

// =============================================================================
// GUIDELINE
// =============================================================================

/// An immutable guideline: the arena of criteria, states and groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    name: String,
    criteria: Vec<Criterion>,
    states: Vec<State>,
    groups: Vec<StateGroup>,
    main_group: Option<StateGroupId>,
    side_groups: Vec<StateGroupId>,
    criteria_by_priority: Vec<CriterionId>,
}

impl Guideline {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn criterion(&self, id: CriterionId) -> Option<&Criterion> {
        self.criteria.get(id.0)
    }

    /// Lookup a criterion, failing with `UnknownCriterion`.
    pub fn require_criterion(&self, id: CriterionId) -> Result<&Criterion, PathwayError> {
        self.criterion(id).ok_or(PathwayError::UnknownCriterion(id))
    }

    #[must_use]
    pub fn criterion_by_name(&self, name: &str) -> Option<CriterionId> {
        self.criteria
            .iter()
            .find(|criterion| criterion.name == name)
            .map(Criterion::id)
    }

    /// All criteria in creation order.
    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    #[must_use]
    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.get(id.0)
    }

    #[must_use]
    pub fn state_by_name(&self, name: &str) -> Option<StateId> {
        self.states
            .iter()
            .find(|state| state.name == name)
            .map(State::id)
    }

    #[must_use]
    pub fn states(&self) -> &[State] {
        &self.states
    }

    #[must_use]
    pub fn state_group(&self, id: StateGroupId) -> Option<&StateGroup> {
        self.groups.get(id.0)
    }

    #[must_use]
    pub fn state_groups(&self) -> &[StateGroup] {
        &self.groups
    }

    #[must_use]
    pub const fn main_group(&self) -> Option<StateGroupId> {
        self.main_group
    }

    #[must_use]
    pub fn side_groups(&self) -> &[StateGroupId] {
        &self.side_groups
    }

    /// Main group first, then the side groups.
    pub fn tracked_groups(&self) -> impl Iterator<Item = StateGroupId> + '_ {
        self.main_group.into_iter().chain(self.side_groups.iter().copied())
    }

    /// Every criterion, highest priority first.
    ///
    /// Explicitly prioritized criteria come first, then criteria reached from
    /// the state conditions of the main and side groups, then the rest in
    /// creation order.
    #[must_use]
    pub fn criteria_by_priority(&self) -> &[CriterionId] {
        &self.criteria_by_priority
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Assembles a `Guideline`.
///
/// Methods that take a handle record the first invalid handle and report it
/// from `build()`, so construction code reads as a flat list of statements.
#[derive(Debug, Default)]
pub struct GuidelineBuilder {
    name: String,
    criteria: Vec<Criterion>,
    states: Vec<State>,
    groups: Vec<StateGroup>,
    main_group: Option<StateGroupId>,
    side_groups: Vec<StateGroupId>,
    prioritized: Vec<CriterionId>,
    defect: Option<PathwayError>,
}

impl GuidelineBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a numerical criterion with constant bounds.
    pub fn numerical_criterion(
        &mut self,
        name: impl Into<String>,
        integral: bool,
        min: f64,
        max: f64,
    ) -> CriterionId {
        self.push_criterion(
            name.into(),
            CriterionKind::Numerical {
                integral,
                min: Numerical::Constant(min),
                max: Numerical::Constant(max),
            },
        )
    }

    /// Add a categorical criterion with its declared value order.
    pub fn categorical_criterion<I, S>(&mut self, name: impl Into<String>, values: I) -> CriterionId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_criterion(
            name.into(),
            CriterionKind::Categorical {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    fn push_criterion(&mut self, name: String, kind: CriterionKind) -> CriterionId {
        let id = CriterionId(self.criteria.len());
        self.criteria.push(Criterion {
            id,
            name,
            kind,
            conditional_value: None,
            exclusions: Vec::new(),
            containing_states: Vec::new(),
        });
        id
    }

    /// Replace the bounds of a numerical criterion with expressions.
    pub fn set_bounds(
        &mut self,
        criterion: CriterionId,
        min: Numerical,
        max: Numerical,
    ) -> &mut Self {
        match self.criteria.get_mut(criterion.0).map(|c| &mut c.kind) {
            Some(CriterionKind::Numerical {
                min: old_min,
                max: old_max,
                ..
            }) => {
                *old_min = min;
                *old_max = max;
            }
            Some(CriterionKind::Categorical { .. }) => self.record_defect(
                PathwayError::InvalidGuideline(format!(
                    "bounds set on categorical criterion {criterion:?}"
                )),
            ),
            None => self.record_defect(PathwayError::UnknownCriterion(criterion)),
        }
        self
    }

    /// Derive a numerical criterion's value from a conditional expression.
    pub fn set_conditional_value(
        &mut self,
        criterion: CriterionId,
        conditional: ConditionalNumerical,
    ) -> &mut Self {
        match self.criteria.get_mut(criterion.0) {
            Some(target) if target.is_numerical() => target.conditional_value = Some(conditional),
            Some(_) => self.record_defect(PathwayError::InvalidGuideline(format!(
                "conditional value set on categorical criterion {criterion:?}"
            ))),
            None => self.record_defect(PathwayError::UnknownCriterion(criterion)),
        }
        self
    }

    /// Make `values` of a categorical criterion ineligible while `condition`
    /// holds.
    pub fn exclude_values<I, S>(
        &mut self,
        criterion: CriterionId,
        values: I,
        condition: Condition,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exclusion = ValueExclusion {
            values: values.into_iter().map(Into::into).collect(),
            excluding_condition: condition,
        };
        match self.criteria.get_mut(criterion.0) {
            Some(target) if target.is_categorical() => target.exclusions.push(exclusion),
            Some(_) => self.record_defect(PathwayError::InvalidGuideline(format!(
                "value exclusion on numerical criterion {criterion:?}"
            ))),
            None => self.record_defect(PathwayError::UnknownCriterion(criterion)),
        }
        self
    }

    /// Put criteria at the front of the evaluation order, in the given order.
    pub fn prioritize_criteria(
        &mut self,
        criteria: impl IntoIterator<Item = CriterionId>,
    ) -> &mut Self {
        self.prioritized.extend(criteria);
        self
    }

    /// Add a state without a value.
    pub fn state(&mut self, name: impl Into<String>, condition: Condition) -> StateId {
        self.push_state(name.into(), condition, None)
    }

    /// Add a state contributing a numerical value.
    pub fn state_with_value(
        &mut self,
        name: impl Into<String>,
        condition: Condition,
        numerical: impl Into<Numerical>,
    ) -> StateId {
        self.push_state(name.into(), condition, Some(numerical.into()))
    }

    fn push_state(
        &mut self,
        name: String,
        condition: Condition,
        numerical: Option<Numerical>,
    ) -> StateId {
        let id = StateId(self.states.len());
        self.states.push(State {
            id,
            name,
            condition,
            numerical,
            group: None,
        });
        id
    }

    /// Add a group of states in display order.
    pub fn state_group(
        &mut self,
        name: impl Into<String>,
        states: Vec<StateId>,
        confirmation: StateConfirmation,
    ) -> StateGroupId {
        let id = StateGroupId(self.groups.len());
        self.groups.push(StateGroup {
            id,
            name: name.into(),
            states,
            states_by_priority: Vec::new(),
            confirmation,
        });
        id
    }

    /// Evaluate the group's states in this order instead of display order.
    pub fn set_states_by_priority(
        &mut self,
        group: StateGroupId,
        states: Vec<StateId>,
    ) -> &mut Self {
        match self.groups.get_mut(group.0) {
            Some(target) => target.states_by_priority = states,
            None => self.record_defect(PathwayError::UnknownStateGroup(group)),
        }
        self
    }

    pub fn set_main_group(&mut self, group: StateGroupId) -> &mut Self {
        self.main_group = Some(group);
        self
    }

    pub fn add_side_group(&mut self, group: StateGroupId) -> &mut Self {
        if !self.side_groups.contains(&group) {
            self.side_groups.push(group);
        }
        self
    }

    fn record_defect(&mut self, defect: PathwayError) {
        if self.defect.is_none() {
            self.defect = Some(defect);
        }
    }

    /// Validate, run the back-reference walk and freeze the guideline.
    ///
    /// # Errors
    ///
    /// Returns the first recorded defect, an unknown handle referenced by an
    /// expression or group, or `InvalidGuideline` for a state listed in two
    /// groups, an empty group, a priority list naming foreign states, or an
    /// expression reading a criterion of the wrong kind.
    pub fn build(mut self) -> Result<Guideline, PathwayError> {
        if let Some(defect) = self.defect.take() {
            return Err(defect);
        }
        self.validate_groups()?;
        self.validate_references()?;

        for group in &self.groups {
            for state in &group.states {
                if let Some(target) = self.states.get_mut(state.0) {
                    target.group = Some(group.id);
                }
            }
        }

        let criteria_by_priority = self.extract_criteria();
        Ok(Guideline {
            name: self.name,
            criteria: self.criteria,
            states: self.states,
            groups: self.groups,
            main_group: self.main_group,
            side_groups: self.side_groups,
            criteria_by_priority,
        })
    }

    fn validate_groups(&self) -> Result<(), PathwayError> {
        for group in self.main_group.iter().chain(&self.side_groups) {
            if group.0 >= self.groups.len() {
                return Err(PathwayError::UnknownStateGroup(*group));
            }
        }
        if let Some(main) = self.main_group
            && self.side_groups.contains(&main)
        {
            return Err(PathwayError::InvalidGuideline(format!(
                "group {main:?} is both main and side group"
            )));
        }

        let mut owned = BTreeSet::new();
        for group in &self.groups {
            if group.states.is_empty() {
                return Err(PathwayError::InvalidGuideline(format!(
                    "state group '{}' has no states",
                    group.name
                )));
            }
            for state in &group.states {
                if state.0 >= self.states.len() {
                    return Err(PathwayError::UnknownState(*state));
                }
                if !owned.insert(*state) {
                    return Err(PathwayError::InvalidGuideline(format!(
                        "state {state:?} belongs to more than one group"
                    )));
                }
            }
            if let Some(foreign) = group
                .states_by_priority
                .iter()
                .find(|state| !group.states.contains(state))
            {
                return Err(PathwayError::InvalidGuideline(format!(
                    "priority list of group '{}' names foreign state {foreign:?}",
                    group.name
                )));
            }
        }
        Ok(())
    }

    fn validate_references(&self) -> Result<(), PathwayError> {
        let mut references = Vec::new();
        for criterion in &self.criteria {
            if let CriterionKind::Numerical { min, max, .. } = &criterion.kind {
                walk_numerical(min, &mut |reference| references.push(reference));
                walk_numerical(max, &mut |reference| references.push(reference));
            }
            if let Some(conditional) = &criterion.conditional_value {
                walk_conditional(conditional, &mut |reference| references.push(reference));
            }
            for exclusion in &criterion.exclusions {
                walk_condition(&exclusion.excluding_condition, &mut |reference| {
                    references.push(reference);
                });
            }
        }
        for state in &self.states {
            walk_condition(&state.condition, &mut |reference| references.push(reference));
            if let Some(numerical) = &state.numerical {
                walk_numerical(numerical, &mut |reference| references.push(reference));
            }
        }
        for criterion in &self.prioritized {
            references.push(Reference::AnyCriterion(*criterion));
        }

        for reference in references {
            self.check_reference(reference)?;
        }
        Ok(())
    }

    fn check_reference(&self, reference: Reference) -> Result<(), PathwayError> {
        match reference {
            Reference::NumericalCriterion(id)
            | Reference::CategoricalCriterion(id)
            | Reference::AnyCriterion(id) => {
                let criterion = self
                    .criteria
                    .get(id.0)
                    .ok_or(PathwayError::UnknownCriterion(id))?;
                let kind_matches = match reference {
                    Reference::NumericalCriterion(_) => criterion.is_numerical(),
                    Reference::CategoricalCriterion(_) => criterion.is_categorical(),
                    _ => true,
                };
                if !kind_matches {
                    return Err(PathwayError::InvalidGuideline(format!(
                        "expression reads criterion '{}' as the wrong kind",
                        criterion.name
                    )));
                }
            }
            Reference::State(id) => {
                if id.0 >= self.states.len() {
                    return Err(PathwayError::UnknownState(id));
                }
            }
            Reference::StateGroup(id) => {
                if id.0 >= self.groups.len() {
                    return Err(PathwayError::UnknownStateGroup(id));
                }
            }
        }
        Ok(())
    }

    /// Compute the evaluation order and fill in `containing_states`.
    fn extract_criteria(&mut self) -> Vec<CriterionId> {
        let mut found: Vec<CriterionId> = Vec::new();
        for criterion in &self.prioritized {
            if !found.contains(criterion) {
                found.push(*criterion);
            }
        }

        let groups: Vec<StateGroupId> = self
            .main_group
            .into_iter()
            .chain(self.side_groups.iter().copied())
            .collect();
        let mut memberships: Vec<(CriterionId, StateMembership)> = Vec::new();
        for group in groups {
            let Some(states) = self.groups.get(group.0).map(|group| group.states.clone()) else {
                continue;
            };
            for state in states {
                let membership = StateMembership { state, group };
                let mut visited = BTreeSet::new();
                for criterion in self.criteria_read_by(state, &mut visited) {
                    if !found.contains(&criterion) {
                        found.push(criterion);
                    }
                    memberships.push((criterion, membership));
                }
            }
        }
        for (criterion, membership) in memberships {
            if let Some(target) = self.criteria.get_mut(criterion.0)
                && !target.containing_states.contains(&membership)
            {
                target.containing_states.push(membership);
            }
        }

        for criterion in &self.criteria {
            if !found.contains(&criterion.id) {
                found.push(criterion.id);
            }
        }
        found
    }

    /// Criteria read by a state's condition and then its value, following
    /// state references.
    fn criteria_read_by(
        &self,
        state: StateId,
        visited: &mut BTreeSet<StateId>,
    ) -> Vec<CriterionId> {
        let mut criteria = Vec::new();
        let mut pending = vec![state];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(state) = self.states.get(current.0) else {
                continue;
            };
            let mut nested = Vec::new();
            let mut visit = |reference: Reference| match reference {
                Reference::NumericalCriterion(id) | Reference::CategoricalCriterion(id) => {
                    if !criteria.contains(&id) {
                        criteria.push(id);
                    }
                }
                Reference::State(id) => nested.push(id),
                Reference::AnyCriterion(_) | Reference::StateGroup(_) => {}
            };
            walk_condition(&state.condition, &mut visit);
            if let Some(numerical) = &state.numerical {
                walk_numerical(numerical, &mut visit);
            }
            // reversed so the first referenced state is walked first
            pending.extend(nested.into_iter().rev());
        }
        criteria
    }
}

// =============================================================================
// EXPRESSION WALK
// =============================================================================

/// A handle read by an expression.
#[derive(Debug, Clone, Copy)]
enum Reference {
    NumericalCriterion(CriterionId),
    CategoricalCriterion(CriterionId),
    AnyCriterion(CriterionId),
    State(StateId),
    StateGroup(StateGroupId),
}

fn walk_condition(condition: &Condition, visit: &mut impl FnMut(Reference)) {
    match condition {
        Condition::Numerical {
            reference,
            threshold,
            ..
        } => {
            walk_numerical(reference, visit);
            walk_numerical(threshold, visit);
        }
        Condition::Categorical { criterion, .. } => {
            visit(Reference::CategoricalCriterion(*criterion))
        }
        Condition::Logical { conditions, .. } => {
            for condition in conditions {
                walk_condition(condition, visit);
            }
        }
        Condition::State { state, .. } => visit(Reference::State(*state)),
    }
}

fn walk_numerical(numerical: &Numerical, visit: &mut impl FnMut(Reference)) {
    match numerical {
        Numerical::Constant(_) => {}
        Numerical::CriterionValue { criterion, .. } => {
            visit(Reference::NumericalCriterion(*criterion))
        }
        Numerical::StateValue(state) => visit(Reference::State(*state)),
        Numerical::StateGroupValue(group) => visit(Reference::StateGroup(*group)),
        Numerical::Function(function) => {
            walk_numerical(&function.left, visit);
            walk_numerical(&function.right, visit);
        }
        Numerical::Conditional(conditional) => walk_conditional(conditional, visit),
    }
}

fn walk_conditional(conditional: &ConditionalNumerical, visit: &mut impl FnMut(Reference)) {
    for arm in &conditional.arms {
        walk_condition(&arm.condition, visit);
        walk_numerical(&arm.numerical, visit);
    }
    if let Some(default) = &conditional.default {
        walk_numerical(default, visit);
    }
}

// =============================================================================
// TESTS
// =============================================================================
