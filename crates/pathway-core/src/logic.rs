//! # Ternary Logic
//!
//! Pure functions evaluating comparisons and boolean operators under
//! three-valued (Kleene) logic.
//!
//! Comparisons between intervals are conservative: a result is `True` or
//! `False` only when every pair of points drawn from the two intervals
//! agrees; otherwise it is `Undefined`.

use crate::types::{BooleanOrUndef, NumericValue};
use serde::{Deserialize, Serialize};

// =============================================================================
// COMPARATOR
// =============================================================================

/// Numeric comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Less,
    LessEq,
    Equal,
    GreaterEq,
    Greater,
    /// Checks only that the left operand carries a value.
    IsSet,
}

impl Comparator {
    /// The comparator obtained by swapping the operands.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Less => Self::Greater,
            Self::LessEq => Self::GreaterEq,
            Self::Equal => Self::Equal,
            Self::GreaterEq => Self::LessEq,
            Self::Greater => Self::Less,
            Self::IsSet => Self::IsSet,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessEq => "<=",
            Self::Equal => "=",
            Self::GreaterEq => ">=",
            Self::Greater => ">",
            Self::IsSet => "is set",
        }
    }
}

/// Compare two optional numeric values.
///
/// Any `None` operand yields `Undefined`, except for `IsSet` which only
/// looks at `a`.
#[must_use]
pub fn compare(a: Option<NumericValue>, op: Comparator, b: Option<NumericValue>) -> BooleanOrUndef {
    if op == Comparator::IsSet {
        return if a.is_some() {
            BooleanOrUndef::True
        } else {
            BooleanOrUndef::Undefined
        };
    }
    let (Some(a), Some(b)) = (a, b) else {
        return BooleanOrUndef::Undefined;
    };
    let (a_low, a_high) = (a.low(), a.high());
    let (b_low, b_high) = (b.low(), b.high());

    match op {
        Comparator::Less => decide(a_high < b_low, a_low >= b_high),
        Comparator::LessEq => decide(a_high <= b_low, a_low > b_high),
        Comparator::GreaterEq => decide(a_low >= b_high, a_high < b_low),
        Comparator::Greater => decide(a_low > b_high, a_high <= b_low),
        Comparator::Equal => {
            if a_low == a_high && b_low == b_high && a_low == b_low {
                BooleanOrUndef::True
            } else if compare(Some(a), Comparator::Less, Some(b)).is_true()
                || compare(Some(a), Comparator::Greater, Some(b)).is_true()
            {
                BooleanOrUndef::False
            } else {
                BooleanOrUndef::Undefined
            }
        }
        Comparator::IsSet => BooleanOrUndef::True,
    }
}

fn decide(proven_true: bool, proven_false: bool) -> BooleanOrUndef {
    if proven_true {
        BooleanOrUndef::True
    } else if proven_false {
        BooleanOrUndef::False
    } else {
        BooleanOrUndef::Undefined
    }
}

// =============================================================================
// LOGICAL OPERATORS
// =============================================================================

/// Boolean operators over three-valued inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOperator {
    And,
    Or,
    /// Exclusive or over the first two inputs.
    Xor,
    /// Negation of the first input.
    Not,
    OneTrue,
    TwoTrue,
    ThreeTrue,
    FourTrue,
    FiveTrue,
    /// `True` unless the first input is `Undefined`.
    IsDefined,
    /// `True` iff the first input is `Undefined`.
    IsUndefined,
}

impl LogicalOperator {
    /// Quorum size for the `{K}_TRUE` family; `Or` is a quorum of one.
    #[must_use]
    pub const fn quorum(self) -> Option<usize> {
        match self {
            Self::Or | Self::OneTrue => Some(1),
            Self::TwoTrue => Some(2),
            Self::ThreeTrue => Some(3),
            Self::FourTrue => Some(4),
            Self::FiveTrue => Some(5),
            Self::And | Self::Xor | Self::Not | Self::IsDefined | Self::IsUndefined => None,
        }
    }
}

/// Evaluate a logical operator over already evaluated inputs.
///
/// Missing positional inputs of `Not`, `Xor`, `IsDefined` and `IsUndefined`
/// count as `Undefined`. `And` over no inputs is `True`.
#[must_use]
pub fn logical(op: LogicalOperator, inputs: &[BooleanOrUndef]) -> BooleanOrUndef {
    let first = inputs.first().copied().unwrap_or(BooleanOrUndef::Undefined);
    match op {
        LogicalOperator::Not => match first {
            BooleanOrUndef::True => BooleanOrUndef::False,
            BooleanOrUndef::False => BooleanOrUndef::True,
            BooleanOrUndef::Undefined => BooleanOrUndef::Undefined,
        },
        LogicalOperator::IsDefined => BooleanOrUndef::from(!first.is_undefined()),
        LogicalOperator::IsUndefined => BooleanOrUndef::from(first.is_undefined()),
        LogicalOperator::Xor => {
            let second = inputs.get(1).copied().unwrap_or(BooleanOrUndef::Undefined);
            if first.is_undefined() || second.is_undefined() {
                BooleanOrUndef::Undefined
            } else {
                BooleanOrUndef::from(first != second)
            }
        }
        LogicalOperator::And => {
            let (trues, undefs) = tally(inputs);
            if trues + undefs < inputs.len() {
                BooleanOrUndef::False
            } else if trues >= inputs.len() {
                BooleanOrUndef::True
            } else {
                BooleanOrUndef::Undefined
            }
        }
        LogicalOperator::Or
        | LogicalOperator::OneTrue
        | LogicalOperator::TwoTrue
        | LogicalOperator::ThreeTrue
        | LogicalOperator::FourTrue
        | LogicalOperator::FiveTrue => {
            let k = op.quorum().unwrap_or(1);
            let (trues, undefs) = tally(inputs);
            if trues >= k {
                BooleanOrUndef::True
            } else if trues + undefs >= k {
                BooleanOrUndef::Undefined
            } else {
                BooleanOrUndef::False
            }
        }
    }
}

fn tally(inputs: &[BooleanOrUndef]) -> (usize, usize) {
    inputs.iter().fold((0, 0), |(trues, undefs), input| match input {
        BooleanOrUndef::True => (trues + 1, undefs),
        BooleanOrUndef::Undefined => (trues, undefs + 1),
        BooleanOrUndef::False => (trues, undefs),
    })
}

// =============================================================================
// TESTS
// =============================================================================
