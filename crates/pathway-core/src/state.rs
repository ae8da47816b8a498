//! # State Machine
//!
//! Confirmation of states and the per-document status of state groups.
//!
//! ## Confirmation Policies
//!
//! - `StrictByPriority`: a state is confirmed only when every higher-priority
//!   state of its group is ruled out.
//! - `CurrentlyConfirmed`: the first `True` state in priority order wins,
//!   regardless of undecided states above it.
//! - `AllConfirmed`: every `True` state is confirmed.

use crate::arithmetic;
use crate::model::{State, StateConfirmation, StateGroup};
use crate::types::{BooleanOrUndef, CriterionId, NumericValue, StateGroupId, StateId};
use crate::values::CriteriaValues;
use std::collections::BTreeSet;
use tracing::debug;

// =============================================================================
// STATE EVALUATION
// =============================================================================

impl State {
    /// Whether the state is confirmed, taking the group's policy and the
    /// higher-priority states of the group into account.
    #[must_use]
    pub fn is_confirmed(&self, values: &CriteriaValues) -> BooleanOrUndef {
        let evaluation = self.condition().evaluate(values);
        let guideline = values.guideline();
        let Some(group) = self.group().and_then(|group| guideline.state_group(group)) else {
            return evaluation;
        };
        if group.confirmation() == StateConfirmation::AllConfirmed || evaluation.is_false() {
            return evaluation;
        }
        for other in group.states_by_priority() {
            if *other == self.id() {
                return evaluation;
            }
            let Some(other) = guideline.state(*other) else {
                continue;
            };
            match other.condition().evaluate(values) {
                BooleanOrUndef::True => return BooleanOrUndef::False,
                BooleanOrUndef::Undefined
                    if group.confirmation() == StateConfirmation::StrictByPriority =>
                {
                    return BooleanOrUndef::Undefined;
                }
                _ => {}
            }
        }
        evaluation
    }

    /// The state's numerical, evaluated.
    #[must_use]
    pub fn value(&self, values: &CriteriaValues) -> Option<NumericValue> {
        self.numerical()?.value(values)
    }

    #[must_use]
    pub fn rounded_value(&self, values: &CriteriaValues, precision: u32) -> Option<NumericValue> {
        self.numerical()?.rounded_value(values, precision)
    }

    /// Whether the criterion appears in the condition or the numerical.
    #[must_use]
    pub fn depends_on_criterion(&self, criterion: CriterionId, values: &CriteriaValues) -> bool {
        self.condition().depends_on_criterion(criterion, values)
            || self
                .numerical()
                .is_some_and(|numerical| numerical.depends_on(values).contains(&criterion))
    }
}

impl StateGroup {
    /// The state whose numerical currently stands for the group.
    ///
    /// The first confirmed state in priority order with a defined value
    /// wins. Unless the policy is `AllConfirmed`, a confirmed state without a
    /// value ends the search, as does an undecided state under
    /// `StrictByPriority`.
    #[must_use]
    pub fn state_relevant_for_value(&self, values: &CriteriaValues) -> Option<StateId> {
        let guideline = values.guideline();
        for state in self.states_by_priority() {
            let Some(state) = guideline.state(*state) else {
                continue;
            };
            match state.is_confirmed(values) {
                BooleanOrUndef::True => {
                    if state.value(values).is_some() {
                        return Some(state.id());
                    }
                    if self.confirmation() != StateConfirmation::AllConfirmed {
                        return None;
                    }
                }
                BooleanOrUndef::Undefined
                    if self.confirmation() == StateConfirmation::StrictByPriority =>
                {
                    return None;
                }
                _ => {}
            }
        }
        None
    }

    #[must_use]
    pub fn value(&self, values: &CriteriaValues) -> Option<NumericValue> {
        let state = self.state_relevant_for_value(values)?;
        values.guideline().state(state)?.value(values)
    }

    #[must_use]
    pub fn rounded_value(&self, values: &CriteriaValues, precision: u32) -> Option<NumericValue> {
        self.value(values)
            .map(|value| arithmetic::round_value(value, precision))
    }
}

// =============================================================================
// STATE GROUP STATUS
// =============================================================================

/// Derived view of one state group for one document.
///
/// Recomputed from the value store on demand; never authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateGroupStatus {
    group: StateGroupId,
    is_side_group: bool,
    possible_by_priority: Vec<StateId>,
    possible: Vec<StateId>,
    confirmed: Vec<StateId>,
}

impl StateGroupStatus {
    #[must_use]
    pub const fn new(group: StateGroupId, is_side_group: bool) -> Self {
        Self {
            group,
            is_side_group,
            possible_by_priority: Vec::new(),
            possible: Vec::new(),
            confirmed: Vec::new(),
        }
    }

    #[must_use]
    pub const fn group(&self) -> StateGroupId {
        self.group
    }

    #[must_use]
    pub const fn is_side_group(&self) -> bool {
        self.is_side_group
    }

    /// Possible states in display order.
    #[must_use]
    pub fn possible_states(&self) -> &[StateId] {
        &self.possible
    }

    /// Possible states in priority order.
    #[must_use]
    pub fn possible_states_by_priority(&self) -> &[StateId] {
        &self.possible_by_priority
    }

    #[must_use]
    pub fn confirmed_states(&self) -> &[StateId] {
        &self.confirmed
    }

    #[must_use]
    pub fn highest_priority_possible_state(&self) -> Option<StateId> {
        self.possible_by_priority.first().copied()
    }

    #[must_use]
    pub fn is_possible(&self, state: StateId) -> bool {
        self.possible.contains(&state)
    }

    #[must_use]
    pub fn is_confirmed(&self, state: StateId) -> bool {
        self.confirmed.contains(&state)
    }

    /// Re-evaluate the group in one pass over its priority order.
    ///
    /// The stored lists are only replaced when their contents change.
    /// Returns whether they did.
    pub fn update(&mut self, values: &CriteriaValues) -> bool {
        let guideline = values.guideline();
        let Some(group) = guideline.state_group(self.group) else {
            return false;
        };
        let mut possible_by_priority = Vec::new();
        let mut confirmed = Vec::new();
        for state in group.states_by_priority() {
            let Some(state) = guideline.state(*state) else {
                continue;
            };
            let evaluation = state.condition().evaluate(values);
            if !evaluation.is_possible() {
                continue;
            }
            possible_by_priority.push(state.id());
            if evaluation.is_true() {
                match group.confirmation() {
                    StateConfirmation::StrictByPriority => {
                        if possible_by_priority.len() == 1 {
                            confirmed.push(state.id());
                        }
                        break;
                    }
                    StateConfirmation::CurrentlyConfirmed => {
                        confirmed.push(state.id());
                        break;
                    }
                    StateConfirmation::AllConfirmed => confirmed.push(state.id()),
                }
            }
        }

        if same_states(&possible_by_priority, &self.possible)
            && same_states(&confirmed, &self.confirmed)
        {
            return false;
        }

        self.possible = in_display_order(group, &possible_by_priority);
        self.possible_by_priority = possible_by_priority;
        self.confirmed = if confirmed.len() > 1
            && group.confirmation() == StateConfirmation::AllConfirmed
        {
            in_display_order(group, &confirmed)
        } else {
            confirmed
        };
        debug!(
            group = group.name(),
            possible = self.possible.len(),
            confirmed = ?self.confirmed,
            "state group changed"
        );
        true
    }

    // =========================================================================
    // RELEVANCE
    // =========================================================================

    /// Whether the criterion influences the highest-priority possible state.
    #[must_use]
    pub fn relevant_for_highest_priority_state(
        &self,
        criterion: CriterionId,
        values: &CriteriaValues,
    ) -> bool {
        self.highest_priority_possible_state()
            .and_then(|state| values.guideline().state(state))
            .is_some_and(|state| state.condition().depends_on_criterion(criterion, values))
    }

    #[must_use]
    pub fn relevant_for_any_possible_state(
        &self,
        criterion: CriterionId,
        values: &CriteriaValues,
    ) -> bool {
        relevant_for_a_state(&self.possible_by_priority, criterion, values)
    }

    #[must_use]
    pub fn relevant_for_confirmed_states(
        &self,
        criterion: CriterionId,
        values: &CriteriaValues,
    ) -> bool {
        relevant_for_a_state(&self.confirmed, criterion, values)
    }

    #[must_use]
    pub fn relevant_for_any_state(&self, criterion: CriterionId, values: &CriteriaValues) -> bool {
        values
            .guideline()
            .state_group(self.group)
            .is_some_and(|group| relevant_for_a_state(group.states(), criterion, values))
    }
}

fn relevant_for_a_state(
    states: &[StateId],
    criterion: CriterionId,
    values: &CriteriaValues,
) -> bool {
    let guideline = values.guideline();
    states
        .iter()
        .filter_map(|state| guideline.state(*state))
        .any(|state| state.depends_on_criterion(criterion, values))
}

fn same_states(a: &[StateId], b: &[StateId]) -> bool {
    a.len() == b.len() && a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

fn in_display_order(group: &StateGroup, states: &[StateId]) -> Vec<StateId> {
    group
        .states()
        .iter()
        .filter(|state| states.contains(state))
        .copied()
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
