//! # Expression Model
//!
//! Closed expression families evaluated against a value snapshot:
//! - `Numerical`: constants, criterion reads, state and state group values,
//!   binary functions and conditional numericals.
//! - `Condition`: numerical comparisons, categorical membership, logical
//!   combinations and references to the confirmation of another state.
//!
//! Trees are built once with the guideline and never mutated afterward.
//! Criteria, states and groups are referenced by handle; a handle that does
//! not resolve evaluates to "no information" rather than failing.

use crate::arithmetic::{self, NumericalOperator, evaluate_arithmetic};
use crate::logic::{Comparator, LogicalOperator, compare, logical};
use crate::types::{BooleanOrUndef, CriterionId, DataSelection, NumericValue, StateGroupId, StateId};
use crate::values::CriteriaValues;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// NUMERICAL
// =============================================================================

/// A numeric expression yielding a scalar, an interval or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Numerical {
    Constant(f64),
    /// Reads the stored value of a numerical criterion.
    CriterionValue {
        criterion: CriterionId,
        selection: DataSelection,
    },
    /// The numerical of a state.
    StateValue(StateId),
    /// The numerical of the state currently selected by a group.
    StateGroupValue(StateGroupId),
    Function(Box<NumericalFunction>),
    Conditional(Box<ConditionalNumerical>),
}

impl Numerical {
    #[must_use]
    pub const fn constant(value: f64) -> Self {
        Self::Constant(value)
    }

    /// Read a criterion with the default selection.
    #[must_use]
    pub fn criterion(criterion: CriterionId) -> Self {
        Self::CriterionValue {
            criterion,
            selection: DataSelection::default(),
        }
    }

    #[must_use]
    pub const fn criterion_with(criterion: CriterionId, selection: DataSelection) -> Self {
        Self::CriterionValue {
            criterion,
            selection,
        }
    }

    #[must_use]
    pub fn function(left: Self, op: NumericalOperator, right: Self) -> Self {
        Self::Function(Box::new(NumericalFunction { op, left, right }))
    }

    #[must_use]
    pub fn conditional(conditional: ConditionalNumerical) -> Self {
        Self::Conditional(Box::new(conditional))
    }

    /// Evaluate against the given store.
    #[must_use]
    pub fn value(&self, values: &CriteriaValues) -> Option<NumericValue> {
        match self {
            Self::Constant(value) => Some(NumericValue::Scalar(*value)),
            Self::CriterionValue {
                criterion,
                selection,
            } => values
                .numerical(*criterion, *selection)
                .map(NumericValue::Interval),
            Self::StateValue(state) => values.guideline().state(*state)?.value(values),
            Self::StateGroupValue(group) => values.guideline().state_group(*group)?.value(values),
            Self::Function(function) => function.value(values),
            Self::Conditional(conditional) => conditional.value(values),
        }
    }

    #[must_use]
    pub fn value_low(&self, values: &CriteriaValues) -> Option<f64> {
        self.value(values).map(|value| value.low())
    }

    #[must_use]
    pub fn value_high(&self, values: &CriteriaValues) -> Option<f64> {
        self.value(values).map(|value| value.high())
    }

    #[must_use]
    pub fn value_mean(&self, values: &CriteriaValues) -> Option<f64> {
        self.value(values).map(|value| value.mean())
    }

    /// Evaluate and round for display.
    #[must_use]
    pub fn rounded_value(&self, values: &CriteriaValues, precision: u32) -> Option<NumericValue> {
        self.value(values)
            .map(|value| arithmetic::round_value(value, precision))
    }

    /// Whether the expression currently carries real information.
    ///
    /// A criterion read is defined only if the store holds a value that is
    /// not the criterion's undefined sentinel.
    #[must_use]
    pub fn is_defined(&self, values: &CriteriaValues) -> bool {
        match self {
            Self::CriterionValue { criterion, .. } => !values.is_undefined(*criterion),
            _ => self.value(values).is_some(),
        }
    }

    /// Criteria the current value depends on.
    #[must_use]
    pub fn depends_on(&self, values: &CriteriaValues) -> BTreeSet<CriterionId> {
        let mut criteria = BTreeSet::new();
        self.collect_dependencies(values, &mut criteria);
        criteria
    }

    pub(crate) fn collect_dependencies(
        &self,
        values: &CriteriaValues,
        criteria: &mut BTreeSet<CriterionId>,
    ) {
        match self {
            Self::Constant(_) => {}
            Self::CriterionValue { criterion, .. } => {
                criteria.insert(*criterion);
            }
            Self::StateValue(state) => {
                if let Some(numerical) = values
                    .guideline()
                    .state(*state)
                    .and_then(|state| state.numerical())
                {
                    numerical.collect_dependencies(values, criteria);
                }
            }
            Self::StateGroupValue(group) => {
                let guideline = values.guideline();
                let Some(group) = guideline.state_group(*group) else {
                    return;
                };
                for numerical in group
                    .states()
                    .iter()
                    .filter_map(|state| guideline.state(*state))
                    .filter_map(|state| state.numerical())
                {
                    numerical.collect_dependencies(values, criteria);
                }
            }
            Self::Function(function) => {
                function.left.collect_dependencies(values, criteria);
                function.right.collect_dependencies(values, criteria);
            }
            Self::Conditional(conditional) => conditional.collect_dependencies(values, criteria),
        }
    }
}

impl From<f64> for Numerical {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

// =============================================================================
// NUMERICAL FUNCTION
// =============================================================================

/// `left op right` with interval semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericalFunction {
    pub op: NumericalOperator,
    pub left: Numerical,
    pub right: Numerical,
}

impl NumericalFunction {
    #[must_use]
    pub fn value(&self, values: &CriteriaValues) -> Option<NumericValue> {
        evaluate_arithmetic(self.left.value(values), self.op, self.right.value(values))
    }

    /// The value the left operand must take for the function to yield
    /// `result`, given the current right operand.
    #[must_use]
    pub fn solve_left_given_result(
        &self,
        result: NumericValue,
        values: &CriteriaValues,
    ) -> Option<NumericValue> {
        arithmetic::solve_left(self.op, result, self.right.value(values)?)
    }

    /// The value the right operand must take for the function to yield
    /// `result`, given the current left operand.
    #[must_use]
    pub fn solve_right_given_result(
        &self,
        result: NumericValue,
        values: &CriteriaValues,
    ) -> Option<NumericValue> {
        arithmetic::solve_right(self.op, self.left.value(values)?, result)
    }
}

// =============================================================================
// CONDITIONAL NUMERICAL
// =============================================================================

/// One `(condition, value)` arm of a conditional numerical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalArm {
    pub condition: Condition,
    pub numerical: Numerical,
}

impl ConditionalArm {
    #[must_use]
    pub fn new(condition: Condition, numerical: impl Into<Numerical>) -> Self {
        Self {
            condition,
            numerical: numerical.into(),
        }
    }
}

/// A value chosen by conditions.
///
/// Arms are evaluated in declaration order. The first arm whose condition is
/// `True` decides alone. Otherwise every arm that is still `Undefined`, plus
/// the default, contributes and the result is their union: an ambiguous
/// situation degrades to a wider but still valid value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionalNumerical {
    pub arms: Vec<ConditionalArm>,
    pub default: Option<Numerical>,
}

impl ConditionalNumerical {
    #[must_use]
    pub fn new(arms: Vec<ConditionalArm>, default: Option<Numerical>) -> Self {
        Self { arms, default }
    }

    /// A conditional with no arms: always the default.
    #[must_use]
    pub fn always(default: impl Into<Numerical>) -> Self {
        Self {
            arms: Vec::new(),
            default: Some(default.into()),
        }
    }

    #[must_use]
    pub fn value(&self, values: &CriteriaValues) -> Option<NumericValue> {
        self.relevant_arms(values, false)
            .into_iter()
            .filter_map(|(_, numerical)| numerical.value(values))
            .fold(None, |union, value| match union {
                None => Some(value),
                Some(current) => Some(
                    evaluate_arithmetic(Some(current), NumericalOperator::Union, Some(value))
                        .unwrap_or(current),
                ),
            })
    }

    /// Criteria the currently relevant arms depend on. Arms that are only
    /// `Undefined` are ignored: either the decisive arm or the default counts.
    #[must_use]
    pub fn depends_on(&self, values: &CriteriaValues) -> BTreeSet<CriterionId> {
        let mut criteria = BTreeSet::new();
        self.collect_dependencies(values, &mut criteria);
        criteria
    }

    fn collect_dependencies(&self, values: &CriteriaValues, criteria: &mut BTreeSet<CriterionId>) {
        for (condition, numerical) in self.relevant_arms(values, true) {
            if let Some(condition) = condition {
                condition.collect_dependencies(values, criteria);
            }
            numerical.collect_dependencies(values, criteria);
        }
    }

    /// The decisive arm alone, or the undecided arms followed by the default.
    fn relevant_arms(
        &self,
        values: &CriteriaValues,
        skip_undefined: bool,
    ) -> Vec<(Option<&Condition>, &Numerical)> {
        let mut relevant = Vec::new();
        for arm in &self.arms {
            match arm.condition.evaluate(values) {
                BooleanOrUndef::True => return vec![(Some(&arm.condition), &arm.numerical)],
                BooleanOrUndef::Undefined if !skip_undefined => {
                    relevant.push((Some(&arm.condition), &arm.numerical));
                }
                BooleanOrUndef::Undefined | BooleanOrUndef::False => {}
            }
        }
        if let Some(default) = &self.default {
            relevant.push((None, default));
        }
        relevant
    }
}

// =============================================================================
// CONDITION
// =============================================================================

/// A three-valued condition over the value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `reference comparator threshold`.
    Numerical {
        reference: Numerical,
        comparator: Comparator,
        threshold: Numerical,
    },
    /// `True` if every observed category is one of `equals_any_of`,
    /// `False` if none is, `Undefined` for a partial match or no observation.
    Categorical {
        criterion: CriterionId,
        equals_any_of: Vec<String>,
        selection: DataSelection,
    },
    Logical {
        operator: LogicalOperator,
        conditions: Vec<Condition>,
    },
    /// `True` iff the confirmation of `state` equals `expected`.
    State {
        state: StateId,
        expected: BooleanOrUndef,
    },
}

impl Condition {
    #[must_use]
    pub fn numerical(
        reference: Numerical,
        comparator: Comparator,
        threshold: impl Into<Numerical>,
    ) -> Self {
        Self::Numerical {
            reference,
            comparator,
            threshold: threshold.into(),
        }
    }

    /// `criterion comparator threshold` for a numerical criterion.
    #[must_use]
    pub fn criterion_compare(
        criterion: CriterionId,
        comparator: Comparator,
        threshold: f64,
    ) -> Self {
        Self::numerical(Numerical::criterion(criterion), comparator, threshold)
    }

    #[must_use]
    pub fn categorical<I, S>(criterion: CriterionId, equals_any_of: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Categorical {
            criterion,
            equals_any_of: equals_any_of.into_iter().map(Into::into).collect(),
            selection: DataSelection::default(),
        }
    }

    #[must_use]
    pub const fn logical(operator: LogicalOperator, conditions: Vec<Self>) -> Self {
        Self::Logical {
            operator,
            conditions,
        }
    }

    #[must_use]
    pub const fn and(conditions: Vec<Self>) -> Self {
        Self::logical(LogicalOperator::And, conditions)
    }

    #[must_use]
    pub const fn or(conditions: Vec<Self>) -> Self {
        Self::logical(LogicalOperator::Or, conditions)
    }

    #[must_use]
    pub const fn state(state: StateId, expected: BooleanOrUndef) -> Self {
        Self::State { state, expected }
    }

    /// A condition that always holds.
    #[must_use]
    pub const fn always() -> Self {
        Self::and(Vec::new())
    }

    /// Evaluate against the given store.
    #[must_use]
    pub fn evaluate(&self, values: &CriteriaValues) -> BooleanOrUndef {
        match self {
            Self::Numerical {
                reference,
                comparator,
                threshold,
            } => {
                let left = if *comparator == Comparator::IsSet && !reference.is_defined(values) {
                    None
                } else {
                    reference.value(values)
                };
                compare(left, *comparator, threshold.value(values))
            }
            Self::Categorical {
                criterion,
                equals_any_of,
                selection,
            } => {
                let observed = values.categorical(*criterion, *selection);
                if observed.is_empty() {
                    return BooleanOrUndef::Undefined;
                }
                let matching = observed
                    .iter()
                    .filter(|category| equals_any_of.contains(category))
                    .count();
                if matching == 0 {
                    BooleanOrUndef::False
                } else if matching == observed.len() {
                    BooleanOrUndef::True
                } else {
                    BooleanOrUndef::Undefined
                }
            }
            Self::Logical {
                operator,
                conditions,
            } => {
                let inputs: Vec<BooleanOrUndef> = conditions
                    .iter()
                    .map(|condition| condition.evaluate(values))
                    .collect();
                logical(*operator, &inputs)
            }
            Self::State { state, expected } => {
                let Some(state) = values.guideline().state(*state) else {
                    return BooleanOrUndef::Undefined;
                };
                let confirmation = state.is_confirmed(values);
                if confirmation == *expected {
                    BooleanOrUndef::True
                } else if confirmation.is_undefined() {
                    BooleanOrUndef::Undefined
                } else {
                    BooleanOrUndef::False
                }
            }
        }
    }

    /// Criteria this condition depends on.
    #[must_use]
    pub fn depends_on(&self, values: &CriteriaValues) -> BTreeSet<CriterionId> {
        let mut criteria = BTreeSet::new();
        self.collect_dependencies(values, &mut criteria);
        criteria
    }

    /// Whether `criterion` influences this condition.
    #[must_use]
    pub fn depends_on_criterion(&self, criterion: CriterionId, values: &CriteriaValues) -> bool {
        self.depends_on(values).contains(&criterion)
    }

    pub(crate) fn collect_dependencies(
        &self,
        values: &CriteriaValues,
        criteria: &mut BTreeSet<CriterionId>,
    ) {
        match self {
            Self::Numerical {
                reference,
                threshold,
                ..
            } => {
                reference.collect_dependencies(values, criteria);
                threshold.collect_dependencies(values, criteria);
            }
            Self::Categorical { criterion, .. } => {
                criteria.insert(*criterion);
            }
            Self::Logical { conditions, .. } => {
                for condition in conditions {
                    condition.collect_dependencies(values, criteria);
                }
            }
            Self::State { state, .. } => {
                if let Some(state) = values.guideline().state(*state) {
                    state.condition().collect_dependencies(values, criteria);
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Guideline, GuidelineBuilder};
    use crate::types::{DataSource, Range, Value};
    use std::sync::Arc;

    struct Fixture {
        guideline: Arc<Guideline>,
        weight: CriterionId,
        height: CriterionId,
        stage: CriterionId,
    }

    fn fixture() -> Fixture {
        let mut builder = GuidelineBuilder::new("fixture");
        let weight = builder.numerical_criterion("weight", false, 0.0, 300.0);
        let height = builder.numerical_criterion("height", false, 0.0, 250.0);
        let stage = builder.categorical_criterion("stage", ["I", "II", "III"]);
        let guideline = Arc::new(builder.build().expect("valid guideline"));
        Fixture {
            guideline,
            weight,
            height,
            stage,
        }
    }

    fn store(fixture: &Fixture) -> CriteriaValues {
        CriteriaValues::new(Arc::clone(&fixture.guideline))
    }

    fn set(values: &mut CriteriaValues, criterion: CriterionId, value: Value) {
        values
            .add(criterion, value, DataSource::Manual, None, None)
            .expect("value accepted");
    }

    #[test]
    fn unset_criterion_reads_as_undefined_range() {
        let fixture = fixture();
        let values = store(&fixture);
        let read = Numerical::criterion(fixture.weight).value(&values);
        assert_eq!(read, Some(NumericValue::Interval(Range::new(0.0, 300.0))));
        assert!(!Numerical::criterion(fixture.weight).is_defined(&values));
    }

    #[test]
    fn function_combines_criteria() {
        let fixture = fixture();
        let mut values = store(&fixture);
        set(&mut values, fixture.weight, Value::number(80.0));
        set(&mut values, fixture.height, Value::number(2.0));

        let ratio = Numerical::function(
            Numerical::criterion(fixture.weight),
            NumericalOperator::DividedBy,
            Numerical::criterion(fixture.height),
        );
        assert_eq!(ratio.value(&values), Some(NumericValue::Scalar(40.0)));
        assert_eq!(
            ratio.depends_on(&values),
            BTreeSet::from([fixture.weight, fixture.height])
        );
    }

    #[test]
    fn function_inverse_solves_missing_operand() {
        let fixture = fixture();
        let mut values = store(&fixture);
        set(&mut values, fixture.height, Value::number(2.0));
        let function = NumericalFunction {
            op: NumericalOperator::Times,
            left: Numerical::criterion(fixture.weight),
            right: Numerical::criterion(fixture.height),
        };
        let solved = function.solve_left_given_result(NumericValue::Scalar(10.0), &values);
        assert_eq!(solved, Some(NumericValue::Scalar(5.0)));
    }

    #[test]
    fn is_set_only_holds_for_real_values() {
        let fixture = fixture();
        let mut values = store(&fixture);
        let condition = Condition::numerical(
            Numerical::criterion(fixture.weight),
            Comparator::IsSet,
            0.0,
        );
        assert_eq!(condition.evaluate(&values), BooleanOrUndef::Undefined);
        set(&mut values, fixture.weight, Value::number(70.0));
        assert_eq!(condition.evaluate(&values), BooleanOrUndef::True);
    }

    #[test]
    fn bounds_decide_comparisons_before_any_value() {
        let fixture = fixture();
        let values = store(&fixture);
        let below_limit = Condition::criterion_compare(fixture.weight, Comparator::LessEq, 500.0);
        let heavy = Condition::criterion_compare(fixture.weight, Comparator::Greater, 100.0);
        assert_eq!(below_limit.evaluate(&values), BooleanOrUndef::True);
        assert_eq!(heavy.evaluate(&values), BooleanOrUndef::Undefined);
    }

    #[test]
    fn categorical_membership() {
        let fixture = fixture();
        let mut values = store(&fixture);
        let early = Condition::categorical(fixture.stage, ["I", "II"]);
        assert_eq!(early.evaluate(&values), BooleanOrUndef::Undefined);

        set(&mut values, fixture.stage, Value::categories(["I"]));
        assert_eq!(early.evaluate(&values), BooleanOrUndef::True);

        set(&mut values, fixture.stage, Value::categories(["II", "III"]));
        assert_eq!(early.evaluate(&values), BooleanOrUndef::Undefined);

        set(&mut values, fixture.stage, Value::categories(["III"]));
        assert_eq!(early.evaluate(&values), BooleanOrUndef::False);
    }

    #[test]
    fn conditional_takes_first_true_arm() {
        let fixture = fixture();
        let mut values = store(&fixture);
        set(&mut values, fixture.weight, Value::number(120.0));
        let conditional = ConditionalNumerical::new(
            vec![
                ConditionalArm::new(
                    Condition::criterion_compare(fixture.weight, Comparator::Greater, 100.0),
                    1.0,
                ),
                ConditionalArm::new(Condition::always(), 2.0),
            ],
            Some(Numerical::constant(3.0)),
        );
        assert_eq!(conditional.value(&values), Some(NumericValue::Scalar(1.0)));
        assert_eq!(conditional.depends_on(&values), BTreeSet::from([fixture.weight]));
    }

    #[test]
    fn conditional_unions_undecided_arms_and_default() {
        let fixture = fixture();
        let values = store(&fixture);
        let conditional = ConditionalNumerical::new(
            vec![
                ConditionalArm::new(
                    Condition::criterion_compare(fixture.weight, Comparator::Greater, 100.0),
                    10.0,
                ),
                ConditionalArm::new(
                    Condition::criterion_compare(fixture.weight, Comparator::Greater, 500.0),
                    50.0,
                ),
            ],
            Some(Numerical::constant(20.0)),
        );
        assert_eq!(
            conditional.value(&values),
            Some(NumericValue::Interval(Range::new(10.0, 20.0)))
        );
        // undecided arms do not count as dependencies, only the default does
        assert!(conditional.depends_on(&values).is_empty());
    }

    #[test]
    fn logical_dependencies_are_collected() {
        let fixture = fixture();
        let values = store(&fixture);
        let condition = Condition::and(vec![
            Condition::criterion_compare(fixture.weight, Comparator::Less, 50.0),
            Condition::categorical(fixture.stage, ["I"]),
        ]);
        assert!(condition.depends_on_criterion(fixture.stage, &values));
        assert!(condition.depends_on_criterion(fixture.weight, &values));
        assert!(!condition.depends_on_criterion(fixture.height, &values));
    }
}
