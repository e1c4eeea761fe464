//! Gateway credential management.
//!
//! Secrets live in a [`SecretStore`] (state-backed in deployment, in-memory
//! for tests) as JSON documents, AES-256-GCM envelope-encrypted at rest. The
//! [`CredentialManager`] caches decrypted credentials per `(merchant,
//! gateway)` for a short TTL and drops the cache entry on rotation.

mod manager;
mod store;

pub use manager::{CredentialManager, CredentialManagerConfig};
pub use store::{MemorySecretStore, SecretStore, StateSecretStore};

use refundry_crypto::SecretString;
use serde::Deserialize;
use thiserror::Error;

/// Decrypted credentials for one merchant's gateway account.
#[derive(Clone, Deserialize)]
pub struct GatewayCredentials {
    /// API key presented on outbound gateway calls.
    pub api_key: SecretString,
    /// Shared secret used to verify inbound webhook signatures.
    pub webhook_secret: SecretString,
}

impl std::fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GatewayCredentials([REDACTED])")
    }
}

/// Errors from credential operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No credentials configured for the merchant/gateway pair.
    #[error("credentials not found for {merchant}/{gateway}")]
    NotFound { merchant: String, gateway: String },

    /// The stored document could not be decrypted.
    #[error("credential decryption failed: {0}")]
    Decrypt(String),

    /// The decrypted document is not valid credential JSON.
    #[error("credential parse failed: {0}")]
    Parse(String),

    /// The backing secret store failed.
    #[error("secret store error: {0}")]
    Backend(String),
}
