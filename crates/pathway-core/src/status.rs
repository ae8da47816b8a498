//! # Criterion Status
//!
//! Per-document editing state of one criterion: the currently selected
//! value, the bounds it must respect and whether a numerical criterion is in
//! range mode.
//!
//! `update_bounds_and_value` re-derives the selection from a value store and
//! reports whether it changed. The propagation engine turns every reported
//! change into a new write.

use crate::model::Criterion;
use crate::primitives::{CRITERION_DEFAULT_MAX, CRITERION_DEFAULT_MIN};
use crate::types::{CriterionId, DataSelection, NumericValue, Range, Value, same_categories};
use crate::values::CriteriaValues;
use std::collections::BTreeSet;

/// The selection of a criterion status.
#[derive(Debug, Clone, PartialEq)]
pub enum Selected {
    Number(f64),
    Range(Range),
    Categories(Vec<String>),
}

impl Selected {
    fn as_numeric(&self) -> Option<NumericValue> {
        match self {
            Self::Number(value) => Some(NumericValue::Scalar(*value)),
            Self::Range(range) => Some(NumericValue::Interval(*range)),
            Self::Categories(_) => None,
        }
    }
}

/// Which endpoints of a selection changed. A scalar change sets both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Change {
    start: bool,
    end: bool,
}

impl Change {
    const NONE: Self = Self {
        start: false,
        end: false,
    };
    const BOTH: Self = Self {
        start: true,
        end: true,
    };

    const fn any(self) -> bool {
        self.start || self.end
    }

    const fn merge(self, other: Self) -> Self {
        Self {
            start: self.start || other.start,
            end: self.end || other.end,
        }
    }
}

impl From<bool> for Change {
    fn from(changed: bool) -> Self {
        if changed { Self::BOTH } else { Self::NONE }
    }
}

/// Editing state of one criterion in one document.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionStatus {
    criterion: CriterionId,
    min_value: f64,
    max_value: f64,
    selected: Option<Selected>,
    is_multi_select: bool,
}

impl CriterionStatus {
    /// Initial status against the given store.
    ///
    /// Numerical bounds that already collapse to a point select that point.
    /// Categorical criteria with more than two values allow several at once.
    #[must_use]
    pub fn new(criterion: &Criterion, values: &CriteriaValues) -> Self {
        let mut status = Self {
            criterion: criterion.id(),
            min_value: CRITERION_DEFAULT_MIN,
            max_value: CRITERION_DEFAULT_MAX,
            selected: None,
            is_multi_select: false,
        };
        if criterion.is_numerical() {
            status.min_value = criterion.lower_bound(values).unwrap_or(CRITERION_DEFAULT_MIN);
            status.max_value = criterion.upper_bound(values).unwrap_or(CRITERION_DEFAULT_MAX);
            if status.min_value == status.max_value {
                status.selected = Some(Selected::Number(status.min_value));
            }
        } else {
            status.is_multi_select = criterion.categories().len() > 2;
        }
        status
    }

    #[must_use]
    pub const fn criterion(&self) -> CriterionId {
        self.criterion
    }

    #[must_use]
    pub const fn min_value(&self) -> f64 {
        self.min_value
    }

    #[must_use]
    pub const fn max_value(&self) -> f64 {
        self.max_value
    }

    #[must_use]
    pub const fn selected(&self) -> Option<&Selected> {
        self.selected.as_ref()
    }

    /// Range mode for numerical criteria, multiple choice for categorical.
    #[must_use]
    pub const fn is_multi_select(&self) -> bool {
        self.is_multi_select
    }

    /// Whether anything is selected. An empty category list counts as unset.
    #[must_use]
    pub fn is_set(&self) -> bool {
        match &self.selected {
            None => false,
            Some(Selected::Categories(names)) => !names.is_empty(),
            Some(_) => true,
        }
    }

    /// Clear the selection and leave range mode.
    pub fn reset(&mut self, criterion: &Criterion) {
        self.selected = None;
        if criterion.is_numerical() {
            self.is_multi_select = false;
        }
    }

    /// The selection as a value that can be written to the store. Nothing
    /// selected becomes the criterion's undefined sentinel.
    #[must_use]
    pub fn value(&self, values: &CriteriaValues) -> Value {
        match &self.selected {
            Some(Selected::Number(value)) => Value::number(*value),
            Some(Selected::Range(range)) => Value::Numerical(*range),
            Some(Selected::Categories(names)) => Value::Categorical(names.clone()),
            None => values
                .undefined_value(self.criterion)
                .unwrap_or_else(|_| Value::Categorical(Vec::new())),
        }
    }

    /// The selection as a range; the undefined range when nothing numeric is
    /// selected.
    #[must_use]
    pub fn selected_as_range(&self, values: &CriteriaValues) -> Range {
        match &self.selected {
            Some(Selected::Number(value)) => Range::point(*value),
            Some(Selected::Range(range)) => *range,
            _ => values
                .undefined_range(self.criterion)
                .unwrap_or_else(|| Range::new(CRITERION_DEFAULT_MIN, CRITERION_DEFAULT_MAX)),
        }
    }

    /// Declared categories not excluded by a currently true exclusion.
    #[must_use]
    pub fn eligible_values(&self, values: &CriteriaValues) -> Vec<String> {
        let Some(criterion) = values.guideline().criterion(self.criterion) else {
            return Vec::new();
        };
        let excluded = excluded_values(criterion, values);
        criterion
            .categories()
            .iter()
            .filter(|value| !excluded.contains(*value))
            .cloned()
            .collect()
    }

    /// Re-derive bounds and selection from `values`. Returns whether the
    /// selection changed.
    ///
    /// `dont_update_range` lists criteria that may not be widened into a
    /// range in this propagation; range-valued criteria add the criteria
    /// they depend on. `suppress_range_to_scalar` lists criteria that stay in
    /// range mode even when their candidate is a single point.
    pub fn update_bounds_and_value(
        &mut self,
        values: &CriteriaValues,
        dont_update_range: &mut BTreeSet<CriterionId>,
        suppress_range_to_scalar: &BTreeSet<CriterionId>,
    ) -> bool {
        let guideline = values.shared_guideline().clone();
        let Some(criterion) = guideline.criterion(self.criterion) else {
            return false;
        };
        if criterion.is_categorical() {
            return self.update_categorical(criterion, values);
        }
        let bounds = self.update_bounds(criterion, values);
        let value = self.update_value(
            criterion,
            values,
            bounds.any(),
            dont_update_range,
            suppress_range_to_scalar,
        );
        bounds.merge(value).any()
    }

    // =========================================================================
    // NUMERICAL
    // =========================================================================

    /// Recompute the bounds and clamp the selection into them.
    fn update_bounds(&mut self, criterion: &Criterion, values: &CriteriaValues) -> Change {
        if matches!(self.selected, Some(Selected::Categories(_))) {
            return Change::NONE;
        }
        let (old_min, old_max) = (self.min_value, self.max_value);
        self.min_value = criterion.lower_bound(values).unwrap_or(CRITERION_DEFAULT_MIN);
        self.max_value = criterion.upper_bound(values).unwrap_or(CRITERION_DEFAULT_MAX);
        let (min, max) = (self.min_value, self.max_value);
        let (min_moved, max_moved) = (old_min != min, old_max != max);

        if self.is_multi_select {
            let range = match &self.selected {
                Some(Selected::Range(range)) => *range,
                Some(Selected::Number(value)) => Range::point(*value),
                _ => values
                    .undefined_range(self.criterion)
                    .unwrap_or_else(|| Range::new(min, max)),
            };
            let (mut start, mut end) = (range.start(), range.end());
            let mut change = Change::NONE;
            if min_moved {
                if start < min {
                    start = min;
                    change.start = true;
                }
                if end < min {
                    end = min;
                    change.end = true;
                }
            }
            if max_moved {
                if start > max {
                    start = max;
                    change.start = true;
                }
                if end > max {
                    end = max;
                    change.end = true;
                }
            }
            self.selected = Some(Selected::Range(Range::new(start, end)));
            return change;
        }

        let mut value = match &self.selected {
            Some(Selected::Range(range)) => Some(range.mean()),
            Some(Selected::Number(value)) => Some(*value),
            _ => None,
        };
        let mut changed = false;
        if let Some(current) = value {
            if min_moved && current < min {
                value = Some(min);
                changed = true;
            }
            if max_moved && current > max {
                value = Some(max);
                changed = true;
            }
        }
        if (min_moved || max_moved) && min == max {
            value = Some(min);
            changed = true;
        }
        self.selected = value.map(Selected::Number);
        Change::from(changed)
    }

    /// Derive the selection from the conditional expression or the store.
    fn update_value(
        &mut self,
        criterion: &Criterion,
        values: &CriteriaValues,
        changed_before: bool,
        dont_update_range: &mut BTreeSet<CriterionId>,
        suppress_range_to_scalar: &BTreeSet<CriterionId>,
    ) -> Change {
        if matches!(self.selected, Some(Selected::Categories(_))) {
            return Change::NONE;
        }
        let id = self.criterion;
        let conditional = criterion.conditional_value();

        // unset, and derived from something that is unset as well
        if self.selected.is_none()
            && values.is_undefined(id)
            && conditional.is_some_and(|conditional| {
                conditional
                    .depends_on(values)
                    .iter()
                    .any(|dependency| values.is_undefined(*dependency))
            })
        {
            return Change::NONE;
        }

        let old = self.selected.clone();
        let mut candidate = conditional
            .and_then(|conditional| conditional.value(values))
            .or_else(|| {
                if changed_before {
                    self.selected.as_ref().and_then(Selected::as_numeric)
                } else if values.is_undefined(id) && self.selected.is_none() {
                    None
                } else {
                    values
                        .numerical(id, DataSelection::default())
                        .map(NumericValue::Interval)
                }
            })
            .filter(|candidate| !candidate.is_indeterminate());

        let suppressed = suppress_range_to_scalar.contains(&id);
        if let Some(NumericValue::Interval(range)) = candidate {
            if range.is_degenerate() && (!self.is_multi_select || !suppressed) {
                candidate = Some(NumericValue::Scalar(range.start()));
            } else {
                if dont_update_range.contains(&id) {
                    return Change::NONE;
                }
                if !self.is_multi_select {
                    self.is_multi_select = true;
                    self.selected = Some(Selected::Range(match &self.selected {
                        Some(Selected::Number(value)) => Range::point(*value),
                        Some(Selected::Range(range)) => *range,
                        _ => Range::new(self.min_value, self.max_value),
                    }));
                }
            }
        }
        if let Some(NumericValue::Scalar(value)) = candidate
            && value.is_finite()
            && self.is_multi_select
            && !suppressed
        {
            self.is_multi_select = false;
        }

        let Some(candidate) = candidate else {
            if old.is_none() {
                return Change::NONE;
            }
            if self.is_multi_select {
                self.selected = Some(Selected::Range(Range::new(self.min_value, self.max_value)));
            } else {
                self.selected = None;
            }
            return Change::BOTH;
        };

        let candidate = self.clamp(round_if_integral(candidate, criterion.is_integral()));

        if self.is_multi_select {
            let range = candidate.to_range();
            self.selected = Some(Selected::Range(range));
            if let Some(conditional) = conditional {
                dont_update_range.extend(conditional.depends_on(values));
            }
            return match old.as_ref().and_then(Selected::as_numeric) {
                Some(old) => Change {
                    start: old.low() != range.start(),
                    end: old.high() != range.end(),
                },
                None => Change::BOTH,
            };
        }

        let value = candidate.mean();
        self.selected = Some(Selected::Number(value));
        Change::from(old != self.selected)
    }

    fn clamp(&self, candidate: NumericValue) -> NumericValue {
        let (min, max) = (self.min_value, self.max_value);
        match candidate {
            NumericValue::Interval(range) => {
                let mut start = range.start();
                let mut end = range.end();
                if start < min {
                    start = min;
                } else if start > max {
                    start = max;
                }
                if end > max {
                    end = max;
                } else if end < min {
                    end = min;
                }
                if start > end {
                    end = start;
                }
                NumericValue::Interval(Range::new(start, end))
            }
            NumericValue::Scalar(mut value) => {
                if value < min {
                    value = min;
                }
                if value > max {
                    value = max;
                }
                NumericValue::Scalar(value)
            }
        }
    }

    // =========================================================================
    // CATEGORICAL
    // =========================================================================

    /// Adopt the stored categories minus those currently excluded.
    fn update_categorical(&mut self, criterion: &Criterion, values: &CriteriaValues) -> bool {
        let stored = values.categorical(self.criterion, DataSelection::default());
        let excluded = excluded_values(criterion, values);
        let effective: Vec<String> = stored
            .iter()
            .filter(|value| !excluded.contains(*value))
            .cloned()
            .collect();
        let changed = !same_categories(&effective, &stored);
        self.selected = Some(Selected::Categories(effective));
        changed
    }
}

fn excluded_values(criterion: &Criterion, values: &CriteriaValues) -> BTreeSet<String> {
    criterion
        .exclusions()
        .iter()
        .filter(|exclusion| exclusion.excluding_condition.evaluate(values).is_true())
        .flat_map(|exclusion| exclusion.values.iter().cloned())
        .collect()
}

fn round_if_integral(value: NumericValue, integral: bool) -> NumericValue {
    if !integral {
        return value;
    }
    match value {
        NumericValue::Scalar(value) => NumericValue::Scalar(value.round()),
        NumericValue::Interval(range) => {
            NumericValue::Interval(Range::new(range.start().round(), range.end().round()))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
