use std::sync::Arc;

use refundry_core::{Transaction, TransactionId};
use refundry_state::{KeyKind, StateKey, StateStore};

use crate::RepoError;

/// Read-mostly store for the transaction read model.
///
/// Transactions are owned by the payments system; they arrive here through
/// ingestion (`put`) and are only read afterwards.
pub struct TransactionStore {
    state: Arc<dyn StateStore>,
}

impl TransactionStore {
    /// Create a store over the given state backend.
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn key(id: &TransactionId) -> StateKey {
        StateKey::global(KeyKind::Transaction, id.as_str())
    }

    /// Fetch a transaction.
    pub async fn fetch(&self, id: &TransactionId) -> Result<Option<Transaction>, RepoError> {
        match self.state.get(&Self::key(id)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| RepoError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Ingest or refresh a transaction read model.
    pub async fn put(&self, transaction: &Transaction) -> Result<(), RepoError> {
        let raw = serde_json::to_string(transaction)
            .map_err(|e| RepoError::Serialization(e.to_string()))?;
        self.state
            .set(&Self::key(&transaction.id), &raw, None)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for TransactionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use refundry_core::{
        money::Currency, transaction::TransactionStatus, GatewayKind, MerchantId, Money,
    };
    use refundry_state_memory::MemoryStateStore;

    #[tokio::test]
    async fn put_fetch_roundtrip() {
        let store = TransactionStore::new(Arc::new(MemoryStateStore::new()));
        let txn = Transaction {
            id: TransactionId::from("T1"),
            merchant_id: MerchantId::from("m-1"),
            amount: Money::new(10_000, Currency::parse("USD").unwrap()),
            gateway_kind: GatewayKind::Stripe,
            gateway_transaction_id: "ch_1".into(),
            captured_at: Utc::now(),
            status: TransactionStatus::Captured,
        };

        assert!(store.fetch(&txn.id).await.unwrap().is_none());
        store.put(&txn).await.unwrap();
        let fetched = store.fetch(&txn.id).await.unwrap().unwrap();
        assert_eq!(fetched.gateway_transaction_id, "ch_1");
    }
}
