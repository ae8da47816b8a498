//! # Core Type Definitions
//!
//! This module contains the value types shared by every layer of the engine:
//! - Arena handles (`CriterionId`, `StateId`, `StateGroupId`)
//! - Observation values (`Range`, `NumericValue`, `Value`, `Timestamp`)
//! - Provenance and aggregation tags (`DataSource`, `DataSelection`)
//! - Three-valued logic (`BooleanOrUndef`)
//! - Error types (`PathwayError`)
//!
//! ## Value Semantics
//!
//! All types in this module are plain values. Cloning yields an independent
//! copy, so nothing handed out by the value store can alias what it holds.
//! Handles implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

// =============================================================================
// ARENA HANDLES
// =============================================================================

/// Handle of a criterion inside its guideline.
/// Criteria are compared by handle, never by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CriterionId(pub usize);

/// Handle of a state inside its guideline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub usize);

/// Handle of a state group inside its guideline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateGroupId(pub usize);

// =============================================================================
// TIMESTAMP
// =============================================================================

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time. Falls back to the epoch if the clock
    /// reports a time before it.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(millis)
    }

    /// Get the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The next representable instant.
    #[must_use]
    pub const fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

// =============================================================================
// RANGE
// =============================================================================

/// A closed numeric interval `[start, end]`.
///
/// A degenerate range (`start == end`) represents a scalar. The invariant
/// `start <= end` holds after every constructor and setter: writes that
/// would invert the interval swap the endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    start: f64,
    end: f64,
    integral: bool,
}

impl Range {
    /// Create a non-integral range, swapping the endpoints if inverted.
    #[must_use]
    pub fn new(start: f64, end: f64) -> Self {
        if start > end {
            Self {
                start: end,
                end: start,
                integral: false,
            }
        } else {
            Self {
                start,
                end,
                integral: false,
            }
        }
    }

    /// Create a range whose values are restricted to integers.
    #[must_use]
    pub fn integral(start: f64, end: f64) -> Self {
        Self::new(start, end).with_integral(true)
    }

    /// Create a degenerate range holding a single value.
    #[must_use]
    pub fn point(value: f64) -> Self {
        Self::new(value, value)
    }

    /// Return a copy with the integral flag replaced.
    #[must_use]
    pub const fn with_integral(mut self, integral: bool) -> Self {
        self.integral = integral;
        self
    }

    #[must_use]
    pub const fn start(&self) -> f64 {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> f64 {
        self.end
    }

    #[must_use]
    pub const fn is_integral(&self) -> bool {
        self.integral
    }

    /// Set the lower endpoint, swapping if it now exceeds the upper one.
    pub fn set_start(&mut self, start: f64) {
        self.start = start;
        self.restore_order();
    }

    /// Set the upper endpoint, swapping if it now falls below the lower one.
    pub fn set_end(&mut self, end: f64) {
        self.end = end;
        self.restore_order();
    }

    fn restore_order(&mut self) {
        if self.start > self.end {
            std::mem::swap(&mut self.start, &mut self.end);
        }
    }

    /// Check if the range represents a single scalar.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }

    /// Midpoint of the range, rounded when the range is integral.
    #[must_use]
    pub fn mean(&self) -> f64 {
        let mean = (self.start + self.end) / 2.0;
        if self.integral { mean.round() } else { mean }
    }

    /// Check if `value` lies inside the closed interval.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.start <= value && value <= self.end
    }

    /// Endpoint equality, ignoring the integral flag.
    #[must_use]
    pub fn same_endpoints(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.is_nan() || self.end.is_nan() {
            return write!(f, "NaN");
        }
        write!(f, "{}-{}", self.start, self.end)
    }
}

// =============================================================================
// NUMERIC VALUE
// =============================================================================

/// Result of evaluating a numeric expression: a scalar or an interval.
///
/// `Scalar(f64::NAN)` is the indeterminate sentinel produced by `0 / 0`
/// style arithmetic; it never compares as a usable number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumericValue {
    Scalar(f64),
    Interval(Range),
}

impl NumericValue {
    /// Lower bound of the value.
    #[must_use]
    pub fn low(&self) -> f64 {
        match self {
            Self::Scalar(value) => *value,
            Self::Interval(range) => range.start(),
        }
    }

    /// Upper bound of the value.
    #[must_use]
    pub fn high(&self) -> f64 {
        match self {
            Self::Scalar(value) => *value,
            Self::Interval(range) => range.end(),
        }
    }

    /// Midpoint of the value (the scalar itself for scalars).
    #[must_use]
    pub fn mean(&self) -> f64 {
        match self {
            Self::Scalar(value) => *value,
            Self::Interval(range) => range.mean(),
        }
    }

    /// Check if the value is the indeterminate `NaN` sentinel.
    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        self.low().is_nan() || self.high().is_nan()
    }

    /// Check if the value is a single point.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.low() == self.high()
    }

    /// Widen a scalar into a degenerate range; ranges are returned as-is.
    #[must_use]
    pub fn to_range(&self) -> Range {
        match self {
            Self::Scalar(value) => Range::point(*value),
            Self::Interval(range) => *range,
        }
    }
}

impl From<f64> for NumericValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Range> for NumericValue {
    fn from(range: Range) -> Self {
        Self::Interval(range)
    }
}

impl fmt::Display for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{value}"),
            Self::Interval(range) => write!(f, "{range}"),
        }
    }
}

// =============================================================================
// CRITERION VALUE
// =============================================================================

/// A value stored for a criterion: a range for numerical criteria, an
/// ordered set of category names for categorical ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Numerical(Range),
    Categorical(Vec<String>),
}

impl Value {
    /// Create a degenerate numerical value.
    #[must_use]
    pub fn number(value: f64) -> Self {
        Self::Numerical(Range::point(value))
    }

    /// Create a categorical value from category names.
    #[must_use]
    pub fn categories<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Categorical(names.into_iter().map(Into::into).collect())
    }

    /// Compare by range endpoints or by set membership.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Numerical(a), Self::Numerical(b)) => a.same_endpoints(b),
            (Self::Categorical(a), Self::Categorical(b)) => same_categories(a, b),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_range(&self) -> Option<&Range> {
        match self {
            Self::Numerical(range) => Some(range),
            Self::Categorical(_) => None,
        }
    }

    #[must_use]
    pub fn as_categories(&self) -> Option<&[String]> {
        match self {
            Self::Numerical(_) => None,
            Self::Categorical(names) => Some(names),
        }
    }
}

/// Set equality of two category lists, ignoring order.
#[must_use]
pub fn same_categories(a: &[String], b: &[String]) -> bool {
    let left: BTreeSet<&String> = a.iter().collect();
    let right: BTreeSet<&String> = b.iter().collect();
    left == right
}

// =============================================================================
// THREE-VALUED LOGIC
// =============================================================================

/// Result of evaluating a condition under Kleene logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BooleanOrUndef {
    True,
    False,
    Undefined,
}

impl BooleanOrUndef {
    #[must_use]
    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }

    #[must_use]
    pub const fn is_false(self) -> bool {
        matches!(self, Self::False)
    }

    #[must_use]
    pub const fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// True or undefined: the outcome is not ruled out.
    #[must_use]
    pub const fn is_possible(self) -> bool {
        !self.is_false()
    }
}

impl From<bool> for BooleanOrUndef {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

// =============================================================================
// PROVENANCE & AGGREGATION
// =============================================================================

/// Where a recorded value came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum DataSource {
    Manual,
    Inferred,
    Combined,
    Text,
    Pdf,
    Image,
    Audio,
    #[default]
    Unknown,
    NotSet,
}

/// Strategy for collapsing a criterion's record history into one record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum DataSelection {
    /// Latest by measurement time, falling back to unmeasured records.
    Latest,
    /// Oldest by measurement time, falling back to unmeasured records.
    Oldest,
    /// Most recently recorded, across all records.
    #[default]
    LatestEntryCreatedTime,
    /// Least recently recorded, across all records.
    OldestEntryCreatedTime,
    Union,
    Intersection,
    Min,
    Max,
    Mean,
    Median,
    /// Most frequent value; ties go to the most recent.
    Mode,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Pathway engine.
///
/// Evaluation never fails: uncertainty is carried as `Undefined`, undefined
/// ranges and `NaN`. Errors only report misuse that a typed API can detect,
/// such as a handle from another guideline or a value of the wrong kind.
#[derive(Debug, Error)]
pub enum PathwayError {
    /// The criterion handle does not belong to this guideline.
    #[error("Criterion not found: {0:?}")]
    UnknownCriterion(CriterionId),

    /// The state handle does not belong to this guideline.
    #[error("State not found: {0:?}")]
    UnknownState(StateId),

    /// The state group handle does not belong to this guideline.
    #[error("State group not found: {0:?}")]
    UnknownStateGroup(StateGroupId),

    /// A value of the wrong kind was written to a criterion.
    #[error("Criterion {criterion:?} expects a {expected} value")]
    KindMismatch {
        criterion: CriterionId,
        expected: &'static str,
    },

    /// The guideline under construction is structurally invalid.
    #[error("Invalid guideline: {0}")]
    InvalidGuideline(String),

    /// Configuration could not be parsed or holds invalid values.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================
