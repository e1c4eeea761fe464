//! Approval workflow engine.
//!
//! Refunds that trip the approval threshold (or an explicit rule) block in
//! `PENDING_APPROVAL` while an [`ApprovalRequest`] walks its required
//! levels. Undecided requests escalate on a deadline; past the last level a
//! configured fallback decides (fail-closed by default).

mod engine;
mod model;
mod rule;

pub use engine::{ApprovalEngine, DecisionOutcome, Escalation, EscalationOutcome};
pub use model::{ApprovalDecision, ApprovalRequest, ApprovalRequestStatus};
pub use rule::{ApprovalPlan, ApprovalRule, RuleCondition};

use thiserror::Error;

/// Errors from approval operations.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// No approval request with that id.
    #[error("approval not found: {0}")]
    NotFound(String),

    /// A decision was already recorded.
    #[error("approval already decided: {0}")]
    AlreadyDecided(String),

    /// The approver is not authorized for the request's current level.
    #[error("approver level {approver_level} cannot decide at level {current_level}")]
    WrongLevel {
        approver_level: String,
        current_level: String,
    },

    /// Parameter resolution failed.
    #[error("parameter resolution failed: {0}")]
    Param(#[from] refundry_params::ParamError),

    /// The backing state store failed.
    #[error("state error: {0}")]
    State(String),

    /// Stored document could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}
