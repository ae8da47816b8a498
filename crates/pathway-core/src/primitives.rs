//! # Engine Primitives
//!
//! Hardcoded constants of the Pathway engine.
//!
//! These values are compiled in. `EngineConfig` may override the round
//! budget and display precision per document; the bounds defaults are fixed.

/// Maximum number of recursive propagation rounds after one criterion edit.
///
/// - Each changed dependent criterion is re-applied with one round less.
/// - Once the budget reaches zero, further ripples are dropped.
///
/// This is the cycle-breaking bound for circular dependency graphs.
pub const MAX_UPDATE_ROUNDS_CRITERIA_VALUES: usize = 10;

/// Lower bound used when a criterion's `min` expression yields nothing.
pub const CRITERION_DEFAULT_MIN: f64 = 0.0;

/// Upper bound used when a criterion's `max` expression yields nothing.
pub const CRITERION_DEFAULT_MAX: f64 = 999.0;

/// Decimal places kept by rounded display values.
///
/// Leading zeros after the decimal point of values below one do not count.
pub const ROUNDING_DECIMAL_PRECISION: u32 = 2;

/// Largest rounding precision honoured; `f64` carries no more significant
/// decimal digits.
pub const MAX_ROUNDING_PRECISION: u32 = 15;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_budget_is_ten() {
        assert_eq!(MAX_UPDATE_ROUNDS_CRITERIA_VALUES, 10);
    }
}
