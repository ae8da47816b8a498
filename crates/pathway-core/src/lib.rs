//! # pathway-core
//!
//! The clinical guideline engine for Pathway.
//!
//! A guideline is a graph of criteria (typed clinical data fields), states
//! (conditions over criteria) and state groups (mutually ranked states). A
//! `Document` records observations for one patient case, evaluates which
//! states are possible or confirmed, and propagates every edit to the
//! criteria derived from it.
//!
//! ## Architectural Constraints
//!
//! - Pure, synchronous Rust: no async, no I/O beyond reading a config file
//! - Deterministic: ordered maps and sets only
//! - Uncertainty is data: `Undefined`, undefined ranges and `NaN`, never
//!   panics or errors
//! - Every propagated edit terminates within the configured round budget
//!
//! ## Layers
//!
//! - `logic`, `arithmetic`: three-valued logic and interval arithmetic
//! - `expression`, `model`: expression trees and the guideline arena
//! - `records`, `values`: the versioned observation store
//! - `state`, `status`: state confirmation and per-criterion status
//! - `propagation`, `document`: the bounded update worklist

// =============================================================================
// MODULES
// =============================================================================

pub mod arithmetic;
pub mod config;
pub mod document;
pub mod expression;
pub mod logic;
pub mod model;
pub mod primitives;
pub mod propagation;
pub mod records;
pub mod state;
pub mod status;
pub mod types;
pub mod values;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BooleanOrUndef, CriterionId, DataSelection, DataSource, NumericValue, PathwayError, Range,
    StateGroupId, StateId, Timestamp, Value,
};

// =============================================================================
// RE-EXPORTS: Evaluation
// =============================================================================

pub use arithmetic::{NumericalOperator, evaluate_arithmetic, round_to_precision};
pub use expression::{Condition, ConditionalArm, ConditionalNumerical, Numerical, NumericalFunction};
pub use logic::{Comparator, LogicalOperator, compare, logical};

// =============================================================================
// RE-EXPORTS: Guideline Model
// =============================================================================

pub use model::{
    Criterion, CriterionKind, Guideline, GuidelineBuilder, State, StateConfirmation, StateGroup,
    StateMembership, ValueExclusion,
};

// =============================================================================
// RE-EXPORTS: Documents
// =============================================================================

pub use config::EngineConfig;
pub use document::Document;
pub use propagation::{Inferencer, PropagationReport};
pub use records::{DataRecord, RecordList};
pub use state::StateGroupStatus;
pub use status::{CriterionStatus, Selected};
pub use values::CriteriaValues;
