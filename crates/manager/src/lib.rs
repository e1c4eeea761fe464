//! The refund manager — entry point for every refund mutation.
//!
//! The manager owns the write path: it validates against policy, decides
//! whether the approval gate applies, persists through optimistic
//! concurrency, and hands execution to the worker pipeline over the queue.
//! Every mutation of an existing refund runs under the refund's distributed
//! lock with a re-read after acquisition.

mod builder;
mod commands;
mod manager;

pub use builder::RefundManagerBuilder;
pub use commands::{CreateRefund, RefundStatistics, UpdateRefund};
pub use manager::{ManagerConfig, RefundManager};

use thiserror::Error;

use refundry_core::FieldError;

/// Errors surfaced by manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The request failed validation; every field error is carried.
    #[error("validation failed with {} field error(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// The refund does not exist.
    #[error("refund not found: {0}")]
    NotFound(String),

    /// The operation collided with concurrent work (idempotency replay in
    /// flight, optimistic-concurrency failure, or an illegal state for the
    /// operation).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The refund's state forbids the operation.
    #[error("state {state} does not permit {operation}")]
    IllegalState {
        operation: &'static str,
        state: &'static str,
    },

    /// The refund's lock could not be acquired within the ceiling.
    #[error("lock timeout on refund {0}")]
    LockTimeout(String),

    /// Parameter resolution failed.
    #[error("parameter resolution failed: {0}")]
    Param(#[from] refundry_params::ParamError),

    /// Persistence failed.
    #[error("repository error: {0}")]
    Repo(String),

    /// The approval engine failed.
    #[error("approval error: {0}")]
    Approval(#[from] refundry_approval::ApprovalError),

    /// Enqueueing failed.
    #[error("queue error: {0}")]
    Queue(#[from] refundry_queue::QueueError),

    /// Anything unexpected; logged with the correlation id.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<refundry_repository::RepoError> for ManagerError {
    fn from(err: refundry_repository::RepoError) -> Self {
        match err {
            refundry_repository::RepoError::NotFound(id) => Self::NotFound(id),
            refundry_repository::RepoError::AlreadyExists(id) => {
                Self::Conflict(format!("already exists: {id}"))
            }
            refundry_repository::RepoError::VersionConflict { key, .. } => {
                Self::Conflict(format!("concurrent modification of {key}"))
            }
            other => Self::Repo(other.to_string()),
        }
    }
}

impl From<refundry_compliance::ComplianceError> for ManagerError {
    fn from(err: refundry_compliance::ComplianceError) -> Self {
        match err {
            refundry_compliance::ComplianceError::Rejected(errors) => Self::Validation(errors),
            refundry_compliance::ComplianceError::Param(e) => Self::Param(e),
        }
    }
}
