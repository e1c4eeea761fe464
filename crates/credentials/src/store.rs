use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use refundry_core::{GatewayKind, MerchantId};
use refundry_state::{KeyKind, StateKey, StateStore};

use crate::CredentialError;

/// Trait for fetching raw credential documents.
///
/// Documents are JSON strings, typically `ENC[AES256-GCM,...]` envelopes.
/// Decryption is the [`CredentialManager`](crate::CredentialManager)'s job.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the raw credential document for a merchant/gateway pair.
    async fn fetch(
        &self,
        merchant: &MerchantId,
        gateway: GatewayKind,
    ) -> Result<Option<String>, CredentialError>;

    /// Store (or rotate) the raw credential document.
    async fn put(
        &self,
        merchant: &MerchantId,
        gateway: GatewayKind,
        document: String,
    ) -> Result<(), CredentialError>;
}

/// In-memory [`SecretStore`] for tests and development.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: DashMap<String, String>,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(merchant: &MerchantId, gateway: GatewayKind) -> String {
        format!("{merchant}:{gateway}")
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn fetch(
        &self,
        merchant: &MerchantId,
        gateway: GatewayKind,
    ) -> Result<Option<String>, CredentialError> {
        Ok(self
            .entries
            .get(&Self::key(merchant, gateway))
            .map(|v| v.clone()))
    }

    async fn put(
        &self,
        merchant: &MerchantId,
        gateway: GatewayKind,
        document: String,
    ) -> Result<(), CredentialError> {
        self.entries.insert(Self::key(merchant, gateway), document);
        Ok(())
    }
}

/// [`SecretStore`] backed by the shared [`StateStore`].
///
/// Documents live under `KeyKind::Credential`, scoped per merchant.
pub struct StateSecretStore {
    state: Arc<dyn StateStore>,
}

impl StateSecretStore {
    /// Create a store over the given state backend.
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn key(merchant: &MerchantId, gateway: GatewayKind) -> StateKey {
        StateKey::merchant(merchant, KeyKind::Credential, gateway.as_str())
    }
}

#[async_trait]
impl SecretStore for StateSecretStore {
    async fn fetch(
        &self,
        merchant: &MerchantId,
        gateway: GatewayKind,
    ) -> Result<Option<String>, CredentialError> {
        self.state
            .get(&Self::key(merchant, gateway))
            .await
            .map_err(|e| CredentialError::Backend(e.to_string()))
    }

    async fn put(
        &self,
        merchant: &MerchantId,
        gateway: GatewayKind,
        document: String,
    ) -> Result<(), CredentialError> {
        self.state
            .set(&Self::key(merchant, gateway), &document, None)
            .await
            .map_err(|e| CredentialError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemorySecretStore::new();
        let merchant = MerchantId::from("m-1");

        assert!(
            store
                .fetch(&merchant, GatewayKind::Stripe)
                .await
                .unwrap()
                .is_none()
        );

        store
            .put(&merchant, GatewayKind::Stripe, "{\"api_key\":\"k\"}".into())
            .await
            .unwrap();

        let doc = store.fetch(&merchant, GatewayKind::Stripe).await.unwrap();
        assert_eq!(doc.as_deref(), Some("{\"api_key\":\"k\"}"));

        // Different gateway is a different slot.
        assert!(
            store
                .fetch(&merchant, GatewayKind::Checkout)
                .await
                .unwrap()
                .is_none()
        );
    }
}
