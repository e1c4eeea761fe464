use std::sync::Arc;

use refundry_core::{money::Currency, MerchantId};
use refundry_state::{KeyKind, StateKey, StateStore};

use crate::RepoError;

/// Per-merchant, per-currency balance counters in minor units.
///
/// Backed by the state store's atomic increment, so concurrent credits and
/// debits cannot lose updates.
pub struct BalanceStore {
    state: Arc<dyn StateStore>,
}

impl BalanceStore {
    /// Create a store over the given state backend.
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn key(merchant: &MerchantId, currency: &Currency) -> StateKey {
        StateKey::merchant(merchant, KeyKind::Balance, currency.as_str())
    }

    /// Current balance in minor units (zero when never touched).
    pub async fn get(
        &self,
        merchant: &MerchantId,
        currency: &Currency,
    ) -> Result<i64, RepoError> {
        let raw = self.state.get(&Self::key(merchant, currency)).await?;
        match raw {
            Some(value) => value
                .parse()
                .map_err(|e| RepoError::Serialization(format!("balance is not an integer: {e}"))),
            None => Ok(0),
        }
    }

    /// Credit the balance, returning the new value.
    pub async fn credit(
        &self,
        merchant: &MerchantId,
        currency: &Currency,
        amount_minor: i64,
    ) -> Result<i64, RepoError> {
        Ok(self
            .state
            .increment(&Self::key(merchant, currency), amount_minor, None)
            .await?)
    }

    /// Debit the balance, returning the new value. Callers enforce
    /// sufficiency before debiting; the counter itself may go negative under
    /// races and reconciliation flags it.
    pub async fn debit(
        &self,
        merchant: &MerchantId,
        currency: &Currency,
        amount_minor: i64,
    ) -> Result<i64, RepoError> {
        Ok(self
            .state
            .increment(&Self::key(merchant, currency), -amount_minor, None)
            .await?)
    }
}

impl std::fmt::Debug for BalanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceStore").finish_non_exhaustive()
    }
}
