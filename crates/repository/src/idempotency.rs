use std::sync::Arc;
use std::time::Duration;

use refundry_state::{KeyKind, StateKey, StateStore};

use crate::RepoError;

/// Marker stored while the claiming operation is still running.
const IN_FLIGHT: &str = "__in_flight__";

/// Outcome of attempting to claim an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyClaim {
    /// The key is new; the caller owns the operation.
    Claimed,
    /// Another caller finished the operation; its result is carried.
    Completed(String),
    /// Another caller is mid-operation.
    InFlight,
}

/// Key → result cache deduplicating retries of the same logical operation.
///
/// The claim/complete pair brackets an operation: `claim` atomically marks
/// the key in flight, `complete` overwrites the marker with the result. A
/// crashed claimer's marker expires with the TTL, releasing the key.
pub struct IdempotencyStore {
    state: Arc<dyn StateStore>,
    ttl: Duration,
}

impl IdempotencyStore {
    /// Create a store with the given record TTL.
    pub fn new(state: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { state, ttl }
    }

    fn key(key: &str) -> StateKey {
        StateKey::global(KeyKind::Idempotency, key)
    }

    /// Try to claim `key` for a new operation.
    pub async fn claim(&self, key: &str) -> Result<IdempotencyClaim, RepoError> {
        let claimed = self
            .state
            .check_and_set(&Self::key(key), IN_FLIGHT, Some(self.ttl))
            .await?;
        if claimed {
            return Ok(IdempotencyClaim::Claimed);
        }

        match self.state.get(&Self::key(key)).await? {
            Some(value) if value == IN_FLIGHT => Ok(IdempotencyClaim::InFlight),
            Some(value) => Ok(IdempotencyClaim::Completed(value)),
            // The record expired between check_and_set and get; retry.
            None => Ok(IdempotencyClaim::InFlight),
        }
    }

    /// Record the result of a claimed operation.
    pub async fn complete(&self, key: &str, result: &str) -> Result<(), RepoError> {
        self.state
            .set(&Self::key(key), result, Some(self.ttl))
            .await?;
        Ok(())
    }

    /// Release a claim without a result (the operation failed before any
    /// side effect; a retry should run fresh).
    pub async fn release(&self, key: &str) -> Result<(), RepoError> {
        self.state.delete(&Self::key(key)).await?;
        Ok(())
    }

    /// Read a completed result, if any.
    pub async fn get(&self, key: &str) -> Result<Option<String>, RepoError> {
        match self.state.get(&Self::key(key)).await? {
            Some(value) if value == IN_FLIGHT => Ok(None),
            other => Ok(other),
        }
    }
}

impl std::fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refundry_state_memory::MemoryStateStore;

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(24 * 3600),
        )
    }

    #[tokio::test]
    async fn claim_complete_replay() {
        let store = store();

        assert_eq!(
            store.claim("create:m-1:T1:key-1").await.unwrap(),
            IdempotencyClaim::Claimed
        );

        // A concurrent retry sees the claim in flight.
        assert_eq!(
            store.claim("create:m-1:T1:key-1").await.unwrap(),
            IdempotencyClaim::InFlight
        );

        store
            .complete("create:m-1:T1:key-1", "rfd_abc")
            .await
            .unwrap();

        // Later retries replay the stored result.
        assert_eq!(
            store.claim("create:m-1:T1:key-1").await.unwrap(),
            IdempotencyClaim::Completed("rfd_abc".into())
        );
        assert_eq!(
            store.get("create:m-1:T1:key-1").await.unwrap().as_deref(),
            Some("rfd_abc")
        );
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let store = store();
        store.claim("k").await.unwrap();
        store.release("k").await.unwrap();
        assert_eq!(store.claim("k").await.unwrap(), IdempotencyClaim::Claimed);
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire() {
        let store = IdempotencyStore::new(
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(60),
        );
        store.claim("k").await.unwrap();
        store.complete("k", "result").await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.claim("k").await.unwrap(), IdempotencyClaim::Claimed);
    }

    #[tokio::test]
    async fn in_flight_is_not_a_result() {
        let store = store();
        store.claim("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
