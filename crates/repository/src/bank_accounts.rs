use std::sync::Arc;

use refundry_core::{BankAccount, BankAccountId, MerchantId, VerificationStatus};
use refundry_state::{KeyKind, StateKey, StateStore};

use crate::RepoError;

/// Bank account persistence, scoped per merchant.
pub struct BankAccountRepository {
    state: Arc<dyn StateStore>,
}

impl BankAccountRepository {
    /// Create a repository over the given state backend.
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn key(merchant: &MerchantId, account_id: &BankAccountId) -> StateKey {
        StateKey::merchant(merchant, KeyKind::BankAccount, account_id.as_str())
    }

    /// Insert a new account. Fails when the id is taken.
    pub async fn insert(&self, account: &BankAccount) -> Result<(), RepoError> {
        let raw = serde_json::to_string(account)
            .map_err(|e| RepoError::Serialization(e.to_string()))?;
        let created = self
            .state
            .check_and_set(&Self::key(&account.merchant_id, &account.account_id), &raw, None)
            .await?;
        if created {
            if account.is_default {
                self.clear_other_defaults(&account.merchant_id, &account.account_id)
                    .await?;
            }
            Ok(())
        } else {
            Err(RepoError::AlreadyExists(account.account_id.to_string()))
        }
    }

    /// Fetch one account.
    pub async fn fetch(
        &self,
        merchant: &MerchantId,
        account_id: &BankAccountId,
    ) -> Result<Option<BankAccount>, RepoError> {
        match self.state.get(&Self::key(merchant, account_id)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| RepoError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// All accounts for a merchant.
    pub async fn list(&self, merchant: &MerchantId) -> Result<Vec<BankAccount>, RepoError> {
        let entries = self
            .state
            .scan_keys(merchant.as_str(), KeyKind::BankAccount, None)
            .await?;
        let mut accounts = Vec::with_capacity(entries.len());
        for (_, raw) in entries {
            accounts.push(
                serde_json::from_str(&raw)
                    .map_err(|e| RepoError::Serialization(e.to_string()))?,
            );
        }
        Ok(accounts)
    }

    /// Overwrite an existing account document.
    pub async fn update(&self, account: &BankAccount) -> Result<(), RepoError> {
        // Require existence so update cannot silently insert.
        if self
            .fetch(&account.merchant_id, &account.account_id)
            .await?
            .is_none()
        {
            return Err(RepoError::NotFound(account.account_id.to_string()));
        }
        let raw = serde_json::to_string(account)
            .map_err(|e| RepoError::Serialization(e.to_string()))?;
        self.state
            .set(&Self::key(&account.merchant_id, &account.account_id), &raw, None)
            .await?;
        Ok(())
    }

    /// Record the outcome of account verification.
    pub async fn set_verification(
        &self,
        merchant: &MerchantId,
        account_id: &BankAccountId,
        status: VerificationStatus,
    ) -> Result<BankAccount, RepoError> {
        let mut account = self
            .fetch(merchant, account_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(account_id.to_string()))?;
        account.verification_status = status;
        self.update(&account).await?;
        Ok(account)
    }

    /// Make one account the merchant's default, clearing any previous one.
    pub async fn set_default(
        &self,
        merchant: &MerchantId,
        account_id: &BankAccountId,
    ) -> Result<(), RepoError> {
        let mut account = self
            .fetch(merchant, account_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(account_id.to_string()))?;
        account.is_default = true;
        self.update(&account).await?;
        self.clear_other_defaults(merchant, account_id).await
    }

    async fn clear_other_defaults(
        &self,
        merchant: &MerchantId,
        keep: &BankAccountId,
    ) -> Result<(), RepoError> {
        for mut account in self.list(merchant).await? {
            if account.account_id != *keep && account.is_default {
                account.is_default = false;
                self.update(&account).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BankAccountRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BankAccountRepository").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refundry_core::bank_account::{AccountType, BankAccountStatus};
    use refundry_state_memory::MemoryStateStore;

    fn repo() -> BankAccountRepository {
        BankAccountRepository::new(Arc::new(MemoryStateStore::new()))
    }

    fn account(id: &str, is_default: bool) -> BankAccount {
        BankAccount {
            account_id: BankAccountId::from(id),
            merchant_id: MerchantId::from("m-1"),
            holder_name: "Acme Corp".into(),
            account_type: AccountType::Checking,
            routing_number: "021000021".into(),
            account_number_last4: "6789".into(),
            encrypted_account_number: "ENC[AES256-GCM,data:x,iv:y,tag:z]".into(),
            status: BankAccountStatus::Active,
            verification_status: VerificationStatus::Unverified,
            is_default,
        }
    }

    #[tokio::test]
    async fn insert_and_list() {
        let repo = repo();
        repo.insert(&account("B1", false)).await.unwrap();
        repo.insert(&account("B2", false)).await.unwrap();

        let accounts = repo.list(&MerchantId::from("m-1")).await.unwrap();
        assert_eq!(accounts.len(), 2);
    }

    #[tokio::test]
    async fn at_most_one_default() {
        let repo = repo();
        let merchant = MerchantId::from("m-1");
        repo.insert(&account("B1", true)).await.unwrap();
        repo.insert(&account("B2", false)).await.unwrap();

        repo.set_default(&merchant, &BankAccountId::from("B2"))
            .await
            .unwrap();

        let accounts = repo.list(&merchant).await.unwrap();
        let defaults: Vec<_> = accounts.iter().filter(|a| a.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].account_id.as_str(), "B2");
    }

    #[tokio::test]
    async fn inserting_new_default_clears_previous() {
        let repo = repo();
        repo.insert(&account("B1", true)).await.unwrap();
        repo.insert(&account("B2", true)).await.unwrap();

        let accounts = repo.list(&MerchantId::from("m-1")).await.unwrap();
        let defaults: Vec<_> = accounts.iter().filter(|a| a.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].account_id.as_str(), "B2");
    }

    #[tokio::test]
    async fn verification_flow() {
        let repo = repo();
        let merchant = MerchantId::from("m-1");
        repo.insert(&account("B1", false)).await.unwrap();

        let updated = repo
            .set_verification(&merchant, &BankAccountId::from("B1"), VerificationStatus::Verified)
            .await
            .unwrap();
        assert_eq!(updated.verification_status, VerificationStatus::Verified);
        assert!(updated.is_usable());
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let repo = repo();
        let err = repo.update(&account("B9", false)).await.unwrap_err();
        assert!(matches!(err, RepoError::NotFound(_)));
    }
}
