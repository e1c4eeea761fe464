use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::refund::GatewayKind;
use crate::types::{MerchantId, TransactionId};

/// Settlement state of an original transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Captured,
    PartiallyRefunded,
    Refunded,
    Voided,
}

/// Read model of the original captured transaction a refund reverses.
///
/// Transactions are owned by the payments system; refund processing only
/// ever reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Transaction {
    pub id: TransactionId,
    pub merchant_id: MerchantId,
    /// Captured amount in minor units.
    pub amount: Money,
    pub gateway_kind: GatewayKind,
    /// Gateway-side identifier of the charge/capture.
    pub gateway_transaction_id: String,
    pub captured_at: DateTime<Utc>,
    pub status: TransactionStatus,
}

impl Transaction {
    /// `true` when the transaction can still be refunded against.
    #[must_use]
    pub fn is_refundable(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Captured | TransactionStatus::PartiallyRefunded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    fn txn(status: TransactionStatus) -> Transaction {
        Transaction {
            id: TransactionId::from("T1"),
            merchant_id: MerchantId::from("m-1"),
            amount: Money::new(10_000, Currency::parse("USD").unwrap()),
            gateway_kind: GatewayKind::Stripe,
            gateway_transaction_id: "ch_123".into(),
            captured_at: Utc::now(),
            status,
        }
    }

    #[test]
    fn refundable_states() {
        assert!(txn(TransactionStatus::Captured).is_refundable());
        assert!(txn(TransactionStatus::PartiallyRefunded).is_refundable());
        assert!(!txn(TransactionStatus::Refunded).is_refundable());
        assert!(!txn(TransactionStatus::Voided).is_refundable());
    }
}
