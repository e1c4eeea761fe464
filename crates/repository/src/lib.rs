//! Persistence layer over the shared state store.
//!
//! Documents are JSON; mutation goes through compare-and-swap on the store's
//! version counter, so a state transition and its history append land
//! atomically or not at all. Any [`StateStore`](refundry_state::StateStore)
//! backend (memory, Redis) works unchanged.

mod bank_accounts;
mod balances;
mod idempotency;
mod refunds;
mod transactions;

pub use balances::BalanceStore;
pub use bank_accounts::BankAccountRepository;
pub use idempotency::{IdempotencyClaim, IdempotencyStore};
pub use refunds::{RefundFilter, RefundPage, RefundRepository, VersionedRefund};
pub use transactions::TransactionStore;

use thiserror::Error;

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An insert collided with an existing document.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The optimistic-concurrency check failed; reload and retry.
    #[error("version conflict on {key}: expected {expected}, found {found}")]
    VersionConflict {
        key: String,
        expected: u64,
        found: u64,
    },

    /// The backing state store failed.
    #[error("state error: {0}")]
    State(String),

    /// A stored document could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<refundry_state::StateError> for RepoError {
    fn from(err: refundry_state::StateError) -> Self {
        Self::State(err.to_string())
    }
}
