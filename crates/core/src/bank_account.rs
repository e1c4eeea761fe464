use serde::{Deserialize, Serialize};

use crate::types::{BankAccountId, MerchantId};

/// Lifecycle state of a stored bank account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BankAccountStatus {
    Active,
    Disabled,
}

/// Micro-deposit / instant verification progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Checking,
    Savings,
}

/// A merchant bank account usable for out-of-band (OTHER) refunds.
///
/// The full account number never leaves the process in the clear:
/// `encrypted_account_number` holds an AES-256-GCM envelope and only the
/// last four digits are stored alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BankAccount {
    pub account_id: BankAccountId,
    pub merchant_id: MerchantId,
    pub holder_name: String,
    pub account_type: AccountType,
    pub routing_number: String,
    /// Last four digits of the account number, safe to display.
    pub account_number_last4: String,
    /// Envelope-encrypted full account number; opaque to this crate. Persisted
    /// as-is; API response types must never carry this field.
    pub encrypted_account_number: String,
    pub status: BankAccountStatus,
    pub verification_status: VerificationStatus,
    /// At most one default account per merchant.
    #[serde(default)]
    pub is_default: bool,
}

impl BankAccount {
    /// `true` when this account may receive refund payouts.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status == BankAccountStatus::Active
            && self.verification_status == VerificationStatus::Verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(status: BankAccountStatus, verification: VerificationStatus) -> BankAccount {
        BankAccount {
            account_id: BankAccountId::from("B1"),
            merchant_id: MerchantId::from("m-1"),
            holder_name: "Acme Corp".into(),
            account_type: AccountType::Checking,
            routing_number: "021000021".into(),
            account_number_last4: "6789".into(),
            encrypted_account_number: "ENC[AES256-GCM,data:...,iv:...,tag:...]".into(),
            status,
            verification_status: verification,
            is_default: false,
        }
    }

    #[test]
    fn usable_requires_active_and_verified() {
        assert!(account(BankAccountStatus::Active, VerificationStatus::Verified).is_usable());
        assert!(!account(BankAccountStatus::Active, VerificationStatus::Unverified).is_usable());
        assert!(!account(BankAccountStatus::Disabled, VerificationStatus::Verified).is_usable());
    }

    #[test]
    fn serde_roundtrip_preserves_envelope() {
        let a = account(BankAccountStatus::Active, VerificationStatus::Verified);
        let json = serde_json::to_string(&a).unwrap();
        let back: BankAccount = serde_json::from_str(&json).unwrap();
        assert_eq!(back.encrypted_account_number, a.encrypted_account_number);
        assert_eq!(back.account_number_last4, "6789");
    }
}
