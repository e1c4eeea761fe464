use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use refundry_core::{GatewayKind, MerchantId};
use refundry_crypto::EnvelopeEncryptor;

use crate::store::SecretStore;
use crate::{CredentialError, GatewayCredentials};

/// Configuration for the [`CredentialManager`].
#[derive(Debug, Clone)]
pub struct CredentialManagerConfig {
    /// How long decrypted credentials stay cached. Kept short so rotations
    /// converge quickly even without an explicit invalidation event.
    pub cache_ttl: Duration,
    /// Maximum number of cached credential sets.
    pub cache_capacity: u64,
}

impl Default for CredentialManagerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 1_000,
        }
    }
}

/// Fetches, decrypts, and caches gateway credentials.
///
/// Misses read through to the [`SecretStore`]; hits are served from a moka
/// TTL cache. Rotation events call [`invalidate`](Self::invalidate) so the
/// next read observes the new secret immediately.
pub struct CredentialManager {
    store: Arc<dyn SecretStore>,
    encryptor: Option<Arc<EnvelopeEncryptor>>,
    cache: Cache<String, Arc<GatewayCredentials>>,
}

impl CredentialManager {
    /// Create a manager over the given store.
    ///
    /// When `encryptor` is `None`, documents are expected to be plaintext
    /// JSON (tests and local development).
    pub fn new(
        store: Arc<dyn SecretStore>,
        encryptor: Option<Arc<EnvelopeEncryptor>>,
        config: CredentialManagerConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            store,
            encryptor,
            cache,
        }
    }

    fn cache_key(merchant: &MerchantId, gateway: GatewayKind) -> String {
        format!("{merchant}:{gateway}")
    }

    /// Get credentials for a merchant/gateway pair, reading through the cache.
    pub async fn get(
        &self,
        merchant: &MerchantId,
        gateway: GatewayKind,
    ) -> Result<Arc<GatewayCredentials>, CredentialError> {
        let key = Self::cache_key(merchant, gateway);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let document = self
            .store
            .fetch(merchant, gateway)
            .await?
            .ok_or_else(|| CredentialError::NotFound {
                merchant: merchant.to_string(),
                gateway: gateway.to_string(),
            })?;

        let json = match &self.encryptor {
            Some(enc) => enc
                .decrypt_json(&document)
                .map_err(|e| CredentialError::Decrypt(e.to_string()))?,
            None => serde_json::from_str(&document)
                .map_err(|e| CredentialError::Parse(e.to_string()))?,
        };

        let credentials: GatewayCredentials =
            serde_json::from_value(json).map_err(|e| CredentialError::Parse(e.to_string()))?;

        let credentials = Arc::new(credentials);
        self.cache.insert(key, Arc::clone(&credentials)).await;
        Ok(credentials)
    }

    /// Drop the cached entry for a merchant/gateway pair.
    ///
    /// Called on credential rotation so the next read hits the store.
    pub async fn invalidate(&self, merchant: &MerchantId, gateway: GatewayKind) {
        self.cache
            .invalidate(&Self::cache_key(merchant, gateway))
            .await;
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager").finish_non_exhaustive()
    }
}
