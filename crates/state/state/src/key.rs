use serde::{Deserialize, Serialize};

use refundry_core::{MerchantId, RefundId};

/// The kind of state being stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Persisted refund document.
    Refund,
    /// Transaction read model.
    Transaction,
    /// Merchant bank account document.
    BankAccount,
    /// Hierarchical configuration parameter record.
    Parameter,
    /// Approval request awaiting a decision.
    Approval,
    /// Index of pending approvals by refund id.
    PendingApprovals,
    /// Cached result of an already-performed operation.
    Idempotency,
    /// Distributed lock entry.
    Lock,
    /// Gateway webhook event id, recorded for replay protection.
    WebhookEvent,
    /// Merchant balance counter (minor units).
    Balance,
    /// Encrypted gateway credential document.
    Credential,
    Custom(String),
}

impl KeyKind {
    /// Return a string representation of the key kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Refund => "refund",
            Self::Transaction => "transaction",
            Self::BankAccount => "bank_account",
            Self::Parameter => "parameter",
            Self::Approval => "approval",
            Self::PendingApprovals => "pending_approvals",
            Self::Idempotency => "idempotency",
            Self::Lock => "lock",
            Self::WebhookEvent => "webhook_event",
            Self::Balance => "balance",
            Self::Credential => "credential",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address state entries in the store.
///
/// `scope` is the merchant id for merchant-owned entries and `"global"` for
/// system-wide ones (program-level parameters, webhook replay markers).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub scope: String,
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    /// Create a new state key.
    #[must_use]
    pub fn new(scope: impl Into<String>, kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            kind,
            id: id.into(),
        }
    }

    /// Create a key scoped to a merchant.
    #[must_use]
    pub fn merchant(merchant: &MerchantId, kind: KeyKind, id: impl Into<String>) -> Self {
        Self::new(merchant.as_str(), kind, id)
    }

    /// Create a system-wide key.
    #[must_use]
    pub fn global(kind: KeyKind, id: impl Into<String>) -> Self {
        Self::new("global", kind, id)
    }

    /// The lock key guarding all mutation of one refund.
    #[must_use]
    pub fn refund_lock(refund_id: &RefundId) -> Self {
        Self::global(KeyKind::Lock, format!("refund:{refund_id}"))
    }

    /// Return a canonical string representation: `scope:kind:id`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.scope, self.kind, self.id)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_kind_as_str() {
        assert_eq!(KeyKind::Refund.as_str(), "refund");
        assert_eq!(KeyKind::Idempotency.as_str(), "idempotency");
        assert_eq!(KeyKind::WebhookEvent.as_str(), "webhook_event");
        assert_eq!(KeyKind::PendingApprovals.as_str(), "pending_approvals");
        assert_eq!(KeyKind::Custom("foo".into()).as_str(), "foo");
    }

    #[test]
    fn state_key_canonical() {
        let key = StateKey::new("m-1", KeyKind::Refund, "rfd_abc");
        assert_eq!(key.canonical(), "m-1:refund:rfd_abc");
    }

    #[test]
    fn refund_lock_key() {
        let key = StateKey::refund_lock(&RefundId::from("rfd_1"));
        assert_eq!(key.canonical(), "global:lock:refund:rfd_1");
    }

    #[test]
    fn merchant_scope() {
        let key = StateKey::merchant(&MerchantId::from("m-9"), KeyKind::Balance, "USD");
        assert_eq!(key.scope, "m-9");
        assert_eq!(key.canonical(), "m-9:balance:USD");
    }
}
