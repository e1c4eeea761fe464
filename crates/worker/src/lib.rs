//! The queue-driven worker pipeline.
//!
//! Workers long-poll the queue and dispatch each message to its handler:
//! refund execution (`PROCESS_REFUND`), settlement polling
//! (`CHECK_GATEWAY`), approval escalation sweeps (`APPROVAL_TICK`), and
//! notification delivery (`NOTIFY`). Retryable failures re-enqueue with
//! exponential backoff and land in the dead-letter buffer once attempts are
//! exhausted; terminal failures move the refund to an absorbing state.

mod config;
mod context;
mod handlers;
mod pipeline;
mod retry;
mod webhook;

pub use config::WorkerConfig;
pub use context::WorkerContext;
pub use pipeline::WorkerPool;
pub use retry::RetryStrategy;
pub use webhook::WebhookIngest;

use thiserror::Error;

/// Errors inside the worker pipeline.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] refundry_queue::QueueError),

    /// Persistence failed.
    #[error("repository error: {0}")]
    Repo(#[from] refundry_repository::RepoError),

    /// The shared state store failed.
    #[error("state error: {0}")]
    State(String),

    /// Credential lookup failed.
    #[error("credential error: {0}")]
    Credential(#[from] refundry_credentials::CredentialError),

    /// The approval engine failed.
    #[error("approval error: {0}")]
    Approval(#[from] refundry_approval::ApprovalError),

    /// A manager operation failed.
    #[error("manager error: {0}")]
    Manager(#[from] refundry_manager::ManagerError),

    /// A webhook signature did not verify.
    #[error("invalid webhook signature for {0}")]
    SignatureInvalid(String),

    /// A webhook arrived for a gateway without a registered adapter.
    #[error("no connector registered for gateway {0}")]
    UnknownGateway(String),

    /// A message payload could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The refund's lock could not be acquired; the message is redelivered.
    #[error("lock busy for refund {0}")]
    LockBusy(String),
}
