//! # Propagation Scenario Tests (T0-T3)
//!
//! End-to-end behaviour of the engine through its public API.
//!
//! ## Tiers
//! - T0: Three-Valued Logic
//! - T1: Record Aggregation
//! - T2: State Confirmation
//! - T3: Propagation

use pathway_core::{
    BooleanOrUndef, Comparator, Condition, ConditionalNumerical, CriteriaValues, CriterionId,
    DataSelection, DataSource, Document, Guideline, GuidelineBuilder, Inferencer, LogicalOperator,
    Numerical, NumericalOperator, Range, Selected, StateConfirmation, Value, logical,
};
use pathway_core::primitives::MAX_UPDATE_ROUNDS_CRITERIA_VALUES as MAX_ROUNDS;
use std::sync::Arc;

// =============================================================================
// TIER T0: THREE-VALUED LOGIC
// =============================================================================

mod t0_three_valued_logic {
    use super::*;

    /// T0.1: An empty conjunction is true.
    #[test]
    fn empty_and_is_true() {
        assert_eq!(logical(LogicalOperator::And, &[]), BooleanOrUndef::True);
    }

    /// T0.2: Undefined survives AND and OR when it can still decide.
    #[test]
    fn undefined_propagates() {
        use BooleanOrUndef::{False, True, Undefined};
        assert_eq!(logical(LogicalOperator::And, &[True, Undefined]), Undefined);
        assert_eq!(logical(LogicalOperator::Or, &[False, Undefined]), Undefined);
    }

    /// T0.3: Quorum operators count true inputs.
    #[test]
    fn two_true_quorum() {
        use BooleanOrUndef::{False, True};
        assert_eq!(logical(LogicalOperator::TwoTrue, &[True, True, False]), True);
    }
}

// =============================================================================
// TIER T1: RECORD AGGREGATION
// =============================================================================

mod t1_record_aggregation {
    use super::*;

    fn store() -> (CriteriaValues, CriterionId, CriterionId) {
        let mut builder = GuidelineBuilder::new("aggregation");
        let level = builder.numerical_criterion("level", false, 0.0, 10.0);
        let finding = builder.categorical_criterion("finding", ["A", "B", "C"]);
        let guideline = builder.build().expect("valid guideline");
        (CriteriaValues::new(Arc::new(guideline)), level, finding)
    }

    /// T1.1: Mean of two points is their midpoint.
    #[test]
    fn mean_of_points() {
        let (mut values, level, _) = store();
        for value in [1.0, 3.0] {
            values
                .add(level, Value::number(value), DataSource::Manual, None, None)
                .expect("value accepted");
        }
        assert_eq!(values.numerical(level, DataSelection::Mean), Some(Range::point(2.0)));
    }

    /// T1.2: Median of three unequal points is the middle one.
    #[test]
    fn median_of_three() {
        let (mut values, level, _) = store();
        for value in [7.0, 2.0, 4.0] {
            values
                .add(level, Value::number(value), DataSource::Manual, None, None)
                .expect("value accepted");
        }
        assert_eq!(values.numerical(level, DataSelection::Median), Some(Range::point(4.0)));
    }

    /// T1.3: Mode over category sets picks the most frequent value.
    #[test]
    fn mode_of_categories() {
        let (mut values, _, finding) = store();
        for value in ["A", "A", "B"] {
            values
                .add(finding, Value::categories([value]), DataSource::Manual, None, None)
                .expect("value accepted");
        }
        assert_eq!(values.categorical(finding, DataSelection::Mode), vec!["A".to_string()]);
    }

    /// T1.4: An empty history reads as the undefined sentinel.
    #[test]
    fn empty_history_is_undefined() {
        let (values, level, finding) = store();
        assert!(values.is_undefined(level));
        assert_eq!(values.numerical(level, DataSelection::default()), Some(Range::new(0.0, 10.0)));
        assert!(values.categorical(finding, DataSelection::default()).is_empty());
    }
}

// =============================================================================
// TIER T2: STATE CONFIRMATION
// =============================================================================

mod t2_state_confirmation {
    use super::*;

    /// T2.1: An undecided higher-priority state blocks confirmation under
    /// `StrictByPriority`, but both states stay possible.
    #[test]
    fn strict_priority_blocks_on_undecided() {
        let mut builder = GuidelineBuilder::new("strict");
        let score = builder.numerical_criterion("score", false, 0.0, 10.0);
        let first = builder.state(
            "first",
            Condition::criterion_compare(score, Comparator::Less, 5.0),
        );
        let second = builder.state("second", Condition::always());
        let group = builder.state_group(
            "group",
            vec![first, second],
            StateConfirmation::StrictByPriority,
        );
        builder.set_main_group(group);
        let document = Document::new(Arc::new(builder.build().expect("valid guideline")));

        let status = document.main_group_status().expect("main group tracked");
        assert_eq!(status.possible_states(), &[first, second]);
        assert!(status.confirmed_states().is_empty());
    }

    /// T2.2: Once the blocking state is ruled out, the next one is confirmed.
    #[test]
    fn strict_priority_confirms_after_rule_out() {
        let mut builder = GuidelineBuilder::new("strict");
        let score = builder.numerical_criterion("score", false, 0.0, 10.0);
        let first = builder.state(
            "first",
            Condition::criterion_compare(score, Comparator::Less, 5.0),
        );
        let second = builder.state("second", Condition::always());
        let group = builder.state_group(
            "group",
            vec![first, second],
            StateConfirmation::StrictByPriority,
        );
        builder.set_main_group(group);
        let mut document = Document::new(Arc::new(builder.build().expect("valid guideline")));

        let report = document
            .update_criterion_value(score, Value::number(8.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        assert_eq!(report.confirmed_states, vec![second]);
        let status = document.main_group_status().expect("main group tracked");
        assert_eq!(status.possible_states(), &[second]);
    }
}

// =============================================================================
// TIER T3: PROPAGATION
// =============================================================================

mod t3_propagation {
    use super::*;

    fn times(criterion: CriterionId, factor: f64) -> ConditionalNumerical {
        ConditionalNumerical::always(Numerical::function(
            Numerical::criterion(criterion),
            NumericalOperator::Times,
            Numerical::constant(factor),
        ))
    }

    fn plus(criterion: CriterionId, offset: f64) -> ConditionalNumerical {
        ConditionalNumerical::always(Numerical::function(
            Numerical::criterion(criterion),
            NumericalOperator::Plus,
            Numerical::constant(offset),
        ))
    }

    fn chain() -> (Guideline, CriterionId, CriterionId, CriterionId) {
        let mut builder = GuidelineBuilder::new("chain");
        let c1 = builder.numerical_criterion("c1", true, 0.0, 100.0);
        let c2 = builder.numerical_criterion("c2", false, 0.0, 999.0);
        let c3 = builder.numerical_criterion("c3", false, 0.0, 999.0);
        builder.set_conditional_value(c2, times(c1, 2.0));
        builder.set_conditional_value(c3, plus(c2, 1.0));
        (builder.build().expect("valid guideline"), c1, c2, c3)
    }

    /// T3.1: An integral criterion rounds its value; a derived criterion
    /// follows in one round.
    #[test]
    fn rounded_edit_reaches_dependent() {
        let (guideline, c1, c2, _) = chain();
        let mut document = Document::new(Arc::new(guideline));
        document
            .update_criterion_value(c1, Value::number(57.6), DataSource::Manual, None)
            .expect("propagation succeeds");

        let values = document.values();
        assert_eq!(values.numerical(c1, DataSelection::default()), Some(Range::point(58.0)));
        assert_eq!(values.numerical(c2, DataSelection::default()), Some(Range::new(116.0, 116.0)));
        let record = values
            .get_record(c2, DataSelection::default())
            .expect("known criterion");
        assert_eq!(record.source(), DataSource::Inferred);
    }

    /// T3.2: Re-applying the same edit writes nothing.
    #[test]
    fn repeated_edit_is_idempotent() {
        let (guideline, c1, c2, _) = chain();
        let mut document = Document::new(Arc::new(guideline));
        document
            .update_criterion_value(c1, Value::number(20.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        let before = (document.values().records(c1).len(), document.values().records(c2).len());

        let report = document
            .update_criterion_value(c1, Value::number(20.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        assert!(report.is_unchanged());
        assert_eq!(
            (document.values().records(c1).len(), document.values().records(c2).len()),
            before
        );
    }

    /// T3.3: An acyclic chain converges before the round budget runs out.
    #[test]
    fn acyclic_chain_converges() {
        let (guideline, c1, _, c3) = chain();
        let mut document = Document::new(Arc::new(guideline));
        let report = document
            .update_criterion_value(c1, Value::number(58.0), DataSource::Manual, None)
            .expect("propagation succeeds");

        assert!(!report.budget_exhausted);
        assert!(report.rounds_used < MAX_ROUNDS);
        assert_eq!(
            document.values().numerical(c3, DataSelection::default()),
            Some(Range::point(117.0))
        );
    }

    /// T3.4: A circular definition terminates within the round budget and
    /// keeps both criteria inside their bounds.
    #[test]
    fn circular_definition_terminates() {
        let mut builder = GuidelineBuilder::new("cycle");
        let a = builder.numerical_criterion("a", false, 0.0, 100.0);
        let b = builder.numerical_criterion("b", false, 0.0, 100.0);
        builder.set_conditional_value(a, plus(b, 1.0));
        builder.set_conditional_value(b, plus(a, 1.0));
        let mut document = Document::new(Arc::new(builder.build().expect("valid guideline")));

        let report = document
            .update_criterion_value(a, Value::number(10.0), DataSource::Manual, None)
            .expect("propagation succeeds");

        assert!(report.rounds_used <= MAX_ROUNDS);
        assert!(report.budget_exhausted);
        for criterion in [a, b] {
            let range = document
                .values()
                .numerical(criterion, DataSelection::default())
                .expect("known criterion");
            assert!(range.start() >= 0.0 && range.end() <= 100.0);
        }
    }

    /// T3.5: Mutually bounded criteria resolve without unbounded recursion.
    #[test]
    fn mutual_bounds_terminate() {
        let mut builder = GuidelineBuilder::new("bounds");
        let a = builder.numerical_criterion("a", false, 0.0, 100.0);
        let b = builder.numerical_criterion("b", false, 0.0, 100.0);
        builder.set_bounds(a, Numerical::constant(0.0), Numerical::criterion(b));
        builder.set_bounds(b, Numerical::criterion(a), Numerical::constant(100.0));
        let mut document = Document::new(Arc::new(builder.build().expect("valid guideline")));

        document
            .update_criterion_value(a, Value::number(50.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        document
            .update_criterion_value(b, Value::number(20.0), DataSource::Manual, None)
            .expect("propagation succeeds");

        let b_value = document
            .values()
            .numerical(b, DataSelection::default())
            .expect("known criterion");
        assert_eq!(b_value, Range::point(50.0));
    }

    /// T3.6: A manual value on a derived criterion is replaced by the
    /// derived value.
    #[test]
    fn derived_criterion_overrides_manual_value() {
        let mut builder = GuidelineBuilder::new("derived");
        let weight = builder.numerical_criterion("weight", false, 0.0, 300.0);
        let double = builder.numerical_criterion("double", false, 0.0, 999.0);
        builder.set_conditional_value(double, times(weight, 2.0));
        let mut document = Document::new(Arc::new(builder.build().expect("valid guideline")));

        document
            .update_criterion_value(weight, Value::number(10.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        let report = document
            .update_criterion_value(double, Value::number(5.0), DataSource::Manual, None)
            .expect("propagation succeeds");

        assert!(report.writes >= 2);
        let record = document
            .values()
            .get_record(double, DataSelection::default())
            .expect("known criterion");
        assert_eq!(record.value(), &Value::number(20.0));
        assert_eq!(record.source(), DataSource::Inferred);
        assert_eq!(
            document.status(double).expect("status exists").selected(),
            Some(&Selected::Number(20.0))
        );
    }

    /// T3.7: An excluded category is removed from the stored value.
    #[test]
    fn excluded_category_is_removed_from_store() {
        let mut builder = GuidelineBuilder::new("exclusion");
        let base = builder.numerical_criterion("base", false, 0.0, 100.0);
        let side = builder.categorical_criterion("side", ["a", "b", "c"]);
        builder.exclude_values(
            side,
            ["b"],
            Condition::criterion_compare(base, Comparator::Greater, 10.0),
        );
        let mut document = Document::new(Arc::new(builder.build().expect("valid guideline")));

        document
            .update_criterion_value(base, Value::number(50.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        document
            .update_criterion_value(side, Value::categories(["a", "b"]), DataSource::Manual, None)
            .expect("propagation succeeds");

        assert_eq!(
            document.values().categorical(side, DataSelection::default()),
            vec!["a".to_string()]
        );
        assert_eq!(
            document.status(side).expect("status exists").selected(),
            Some(&Selected::Categories(vec!["a".to_string()]))
        );
    }

    /// T3.8: The trait drives any inferencer the same way.
    #[test]
    fn trait_and_document_agree() {
        let (guideline, c1, c2, _) = chain();
        let guideline = Arc::new(guideline);
        let mut through_trait = Document::new(Arc::clone(&guideline));
        let mut direct = Document::new(guideline);

        Inferencer::update_criterion_value(
            &mut through_trait,
            c1,
            Value::number(5.0),
            DataSource::Manual,
            None,
        )
            .expect("propagation succeeds");
        direct
            .update_criterion_value(c1, Value::number(5.0), DataSource::Manual, None)
            .expect("propagation succeeds");
        assert!(through_trait.values().same_as(direct.values(), DataSelection::default()));
        assert_eq!(
            direct.values().numerical(c2, DataSelection::default()),
            Some(Range::point(10.0))
        );
    }
}
