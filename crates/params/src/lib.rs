//! Hierarchical configuration parameters.
//!
//! Every policy knob in the refund pipeline (refund-age windows, per-refund
//! caps, approval thresholds) resolves through a four-level hierarchy:
//! Program (global root) → Bank → Organization → Merchant (most specific).
//! A more specific record overrides a more general one unless an ancestor is
//! marked non-overridable, in which case the ancestor pins the value for
//! every descendant.

pub mod catalog;
mod definition;
mod hierarchy;
mod record;
mod resolver;
mod value;

pub use definition::{ParameterDefinition, ValidationRule};
pub use hierarchy::{HierarchyChain, HierarchyProvider, StaticHierarchy};
pub use record::{EntityLevel, Parameter};
pub use resolver::{ParameterResolver, ParameterResolverConfig, ResolvedParameter, ValueSource};
pub use value::{DataType, ParameterValue};

use thiserror::Error;

/// Errors from parameter definition, storage, and resolution.
#[derive(Debug, Error)]
pub enum ParamError {
    /// The parameter name has no registered definition.
    #[error("unknown parameter: {0}")]
    Unknown(String),

    /// The value violates its definition's type or rules.
    #[error("invalid parameter value for {name}: {reason}")]
    Invalid { name: String, reason: String },

    /// A write would leave two records effective at the same instant, or
    /// duplicate an existing `(name, level, entity, effective_date)` tuple.
    #[error("conflicting parameter record for {0}")]
    Conflict(String),

    /// No record is effective anywhere in the chain and the definition
    /// declares no default.
    #[error("parameter {0} has no effective value and no default")]
    Unresolved(String),

    /// The merchant has no hierarchy chain configured.
    #[error("unknown merchant: {0}")]
    UnknownMerchant(String),

    /// The backing state store failed.
    #[error("state error: {0}")]
    State(String),

    /// Stored document could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}
