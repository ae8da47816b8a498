//! # Interval Arithmetic
//!
//! Interval-safe evaluation of the numeric operators used by expressions
//! and by interval-returning aggregations of the value store.
//!
//! ## Rules
//!
//! - Any missing operand propagates to a missing result.
//! - Integral ranges are rounded at their endpoints before use.
//! - Division by an interval containing 0, and logarithms whose base interval
//!   contains 1, widen the result toward the affected infinity.
//! - If both infinities are produced at once (the `0 / 0` case) the result is
//!   the `NaN` scalar, an explicit "indeterminate" marker.
//! - A degenerate result collapses to a scalar; otherwise a `Range` is
//!   returned.

use crate::logic::{Comparator, compare};
use crate::primitives::MAX_ROUNDING_PRECISION;
use crate::types::{NumericValue, Range};
use serde::{Deserialize, Serialize};

// =============================================================================
// OPERATORS
// =============================================================================

/// Binary numeric operators. `Log` takes the base on the left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericalOperator {
    Plus,
    Minus,
    Times,
    DividedBy,
    Power,
    Log,
    Min,
    Max,
    Mean,
    Union,
    Intersection,
}

impl NumericalOperator {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Times => "*",
            Self::DividedBy => "/",
            Self::Power => "^",
            Self::Log => "log",
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Union => "union",
            Self::Intersection => "intersection",
        }
    }
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Apply `op` to two optional operands with interval semantics.
#[must_use]
pub fn evaluate_arithmetic(
    a: Option<NumericValue>,
    op: NumericalOperator,
    b: Option<NumericValue>,
) -> Option<NumericValue> {
    let b = b?;
    let (a_low, a_high) = endpoints(a?);
    let (b_low, b_high) = endpoints(b);
    // a continuous exponent range passes through fractional exponents
    let continuous_exponent = matches!(
        b,
        NumericValue::Interval(range) if !range.is_integral() && !range.is_degenerate()
    );

    let (low, high) = match op {
        NumericalOperator::Plus => (a_low + b_low, a_high + b_high),
        NumericalOperator::Minus => (a_low - b_high, a_high - b_low),
        NumericalOperator::Times => extremes(&[
            a_low * b_low,
            a_low * b_high,
            a_high * b_low,
            a_high * b_high,
        ]),
        NumericalOperator::DividedBy => divide(a_low, a_high, b_low, b_high),
        NumericalOperator::Power => power(a_low, a_high, b_low, b_high, continuous_exponent)?,
        NumericalOperator::Log => logarithm(a_low, a_high, b_low, b_high)?,
        NumericalOperator::Min => (a_low.min(b_low), a_high.min(b_high)),
        NumericalOperator::Max => (a_low.max(b_low), a_high.max(b_high)),
        NumericalOperator::Mean => ((a_low + b_low) / 2.0, (a_high + b_high) / 2.0),
        NumericalOperator::Union => (a_low.min(b_low), a_high.max(b_high)),
        NumericalOperator::Intersection => (a_low.max(b_low), a_high.min(b_high)),
    };

    if low.is_nan() || high.is_nan() {
        return Some(NumericValue::Scalar(f64::NAN));
    }
    if low > high {
        return None;
    }
    if low == f64::NEG_INFINITY && high == f64::INFINITY {
        return Some(NumericValue::Scalar(f64::NAN));
    }
    if low == high {
        return Some(NumericValue::Scalar(low));
    }
    Some(NumericValue::Interval(Range::new(low, high)))
}

fn endpoints(value: NumericValue) -> (f64, f64) {
    match value {
        NumericValue::Scalar(value) => (value, value),
        NumericValue::Interval(range) if range.is_integral() => {
            (range.start().round(), range.end().round())
        }
        NumericValue::Interval(range) => (range.start(), range.end()),
    }
}

/// Minimum and maximum of the candidates. Empty input yields `(+inf, -inf)`.
fn extremes(candidates: &[f64]) -> (f64, f64) {
    candidates
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), &value| {
            (low.min(value), high.max(value))
        })
}

fn divide(a_low: f64, a_high: f64, b_low: f64, b_high: f64) -> (f64, f64) {
    let mut candidates = Vec::with_capacity(4);
    if b_low != 0.0 {
        candidates.extend([a_low / b_low, a_high / b_low]);
    }
    if b_high != 0.0 {
        candidates.extend([a_low / b_high, a_high / b_high]);
    }
    let (mut low, mut high) = extremes(&candidates);

    if b_low <= 0.0 && b_high >= 0.0 {
        if a_high >= 0.0 {
            high = f64::INFINITY;
        }
        if a_low <= 0.0 {
            low = f64::NEG_INFINITY;
        }
    }
    (low, high)
}

fn power(
    a_low: f64,
    a_high: f64,
    b_low: f64,
    b_high: f64,
    continuous_exponent: bool,
) -> Option<(f64, f64)> {
    // 0 raised to a negative exponent divides by zero
    let unbounded = a_low <= 0.0 && a_high >= 0.0 && b_low < 0.0;

    let (low, high) = if a_low >= 0.0 {
        extremes(&[
            a_low.powf(b_low),
            a_low.powf(b_high),
            a_high.powf(b_low),
            a_high.powf(b_high),
        ])
    } else {
        // Roots of negative bases are undefined
        if continuous_exponent || b_low.fract() != 0.0 || b_high.fract() != 0.0 {
            return None;
        }
        let mut candidates = vec![a_low.powf(b_high), a_high.powf(b_high)];
        if b_high - 1.0 >= b_low {
            candidates.extend([a_low.powf(b_high - 1.0), a_high.powf(b_high - 1.0)]);
        }
        extremes(&candidates)
    };
    Some((low, if unbounded { f64::INFINITY } else { high }))
}

fn logarithm(base_low: f64, base_high: f64, arg_low: f64, arg_high: f64) -> Option<(f64, f64)> {
    if base_low < 0.0 || arg_low <= 0.0 {
        return None;
    }
    let mut candidates = Vec::with_capacity(4);
    for base in [base_low, base_high] {
        if base != 1.0 {
            candidates.extend([arg_low.ln() / base.ln(), arg_high.ln() / base.ln()]);
        }
    }
    let (mut low, mut high) = extremes(&candidates);

    if base_low <= 1.0 && base_high >= 1.0 {
        if arg_low < 1.0 {
            low = f64::NEG_INFINITY;
        }
        if arg_high > 1.0 {
            high = f64::INFINITY;
        }
    }
    Some((low, high))
}

// =============================================================================
// ANALYTIC INVERSES
// =============================================================================

/// Solve `x op right = result` for `x`.
///
/// `Min`/`Max` only invert when `result` is provably on the selecting side
/// of `right`; `Union`/`Intersection` return `result` unchanged.
#[must_use]
pub fn solve_left(
    op: NumericalOperator,
    result: NumericValue,
    right: NumericValue,
) -> Option<NumericValue> {
    let result = Some(result);
    let right = Some(right);
    match op {
        NumericalOperator::Plus => evaluate_arithmetic(result, NumericalOperator::Minus, right),
        NumericalOperator::Minus => evaluate_arithmetic(result, NumericalOperator::Plus, right),
        NumericalOperator::Times => {
            evaluate_arithmetic(result, NumericalOperator::DividedBy, right)
        }
        NumericalOperator::DividedBy => {
            evaluate_arithmetic(result, NumericalOperator::Times, right)
        }
        NumericalOperator::Power => {
            let exponent = evaluate_arithmetic(one(), NumericalOperator::DividedBy, right);
            evaluate_arithmetic(result, NumericalOperator::Power, exponent)
        }
        NumericalOperator::Log => {
            let exponent = evaluate_arithmetic(one(), NumericalOperator::DividedBy, result);
            evaluate_arithmetic(right, NumericalOperator::Power, exponent)
        }
        NumericalOperator::Min => selected_by(result, Comparator::Less, right),
        NumericalOperator::Max => selected_by(result, Comparator::Greater, right),
        NumericalOperator::Mean => twice_minus(result, right),
        NumericalOperator::Union | NumericalOperator::Intersection => result,
    }
}

/// Solve `left op x = result` for `x`.
#[must_use]
pub fn solve_right(
    op: NumericalOperator,
    left: NumericValue,
    result: NumericValue,
) -> Option<NumericValue> {
    let left = Some(left);
    let result = Some(result);
    match op {
        NumericalOperator::Plus => evaluate_arithmetic(result, NumericalOperator::Minus, left),
        NumericalOperator::Minus => evaluate_arithmetic(left, NumericalOperator::Minus, result),
        NumericalOperator::Times => evaluate_arithmetic(result, NumericalOperator::DividedBy, left),
        NumericalOperator::DividedBy => {
            evaluate_arithmetic(left, NumericalOperator::DividedBy, result)
        }
        NumericalOperator::Power => evaluate_arithmetic(left, NumericalOperator::Log, result),
        NumericalOperator::Log => evaluate_arithmetic(left, NumericalOperator::Power, result),
        NumericalOperator::Min => selected_by(result, Comparator::Less, left),
        NumericalOperator::Max => selected_by(result, Comparator::Greater, left),
        NumericalOperator::Mean => twice_minus(result, left),
        NumericalOperator::Union | NumericalOperator::Intersection => result,
    }
}

fn one() -> Option<NumericValue> {
    Some(NumericValue::Scalar(1.0))
}

fn selected_by(
    result: Option<NumericValue>,
    comparator: Comparator,
    other: Option<NumericValue>,
) -> Option<NumericValue> {
    if compare(result, comparator, other).is_true() {
        result
    } else {
        None
    }
}

/// `2 * result - other`
fn twice_minus(result: Option<NumericValue>, other: Option<NumericValue>) -> Option<NumericValue> {
    let doubled = evaluate_arithmetic(
        Some(NumericValue::Scalar(2.0)),
        NumericalOperator::Times,
        result,
    );
    evaluate_arithmetic(doubled, NumericalOperator::Minus, other)
}

// =============================================================================
// ROUNDING
// =============================================================================

/// Round to `precision` decimal places, where leading zeros after the
/// decimal point of values below one do not count.
///
/// `round_to_precision(0.012345, 2) == 0.012`. Precisions above
/// [`MAX_ROUNDING_PRECISION`] are capped.
#[must_use]
pub fn round_to_precision(value: f64, precision: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let mut scaled = value;
    let mut leading_zeros = 0_i32;
    while scaled.abs() < 1.0 {
        scaled *= 10.0;
        leading_zeros += 1;
    }
    let mut digits = precision.min(MAX_ROUNDING_PRECISION) as i32;
    if leading_zeros > 0 {
        digits -= 1;
    }
    let rounded = (scaled * 10_f64.powi(digits)).round() / 10_f64.powi(leading_zeros + digits);
    if rounded.is_finite() { rounded } else { value }
}

/// Apply [`round_to_precision`] to a scalar or to both endpoints of a range.
#[must_use]
pub fn round_value(value: NumericValue, precision: u32) -> NumericValue {
    match value {
        NumericValue::Scalar(scalar) => NumericValue::Scalar(round_to_precision(scalar, precision)),
        NumericValue::Interval(range) => NumericValue::Interval(Range::new(
            round_to_precision(range.start(), precision),
            round_to_precision(range.end(), precision),
        )),
    }
}

// =============================================================================
// TESTS
// =============================================================================
