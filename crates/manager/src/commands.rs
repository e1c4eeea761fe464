use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use refundry_core::{
    BankAccountId, CustomerId, MerchantId, RefundMethod, TransactionId,
};

/// Command to create a refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateRefund {
    pub merchant_id: MerchantId,
    pub transaction_id: TransactionId,
    /// Amount in minor units.
    pub amount: i64,
    /// ISO-4217 currency code.
    pub currency: String,
    pub refund_method: RefundMethod,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_account_id: Option<BankAccountId>,
    /// Client-supplied idempotency key; retries with the same key replay the
    /// original result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Patch applied by the update operation. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateRefund {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_account_id: Option<BankAccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl UpdateRefund {
    /// `true` when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.reason.is_none()
            && self.reason_code.is_none()
            && self.bank_account_id.is_none()
            && self.metadata.is_none()
    }
}

/// Aggregates served by the statistics endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RefundStatistics {
    pub total_count: usize,
    /// Counts keyed by status tag.
    pub by_status: HashMap<String, usize>,
    /// Σ completed refund amounts in minor units, keyed by currency.
    pub completed_minor_by_currency: HashMap<String, i64>,
    /// Mean seconds from creation to completion, over completed refunds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_completion_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_detection() {
        assert!(UpdateRefund::default().is_empty());
        let patch = UpdateRefund {
            amount: Some(100),
            ..UpdateRefund::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn create_deserializes_from_api_shape() {
        let json = r#"{
            "merchant_id": "m-1",
            "transaction_id": "T1",
            "amount": 2500,
            "currency": "USD",
            "refund_method": "ORIGINAL_PAYMENT",
            "reason": "customer_request"
        }"#;
        let cmd: CreateRefund = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.amount, 2500);
        assert_eq!(cmd.refund_method, RefundMethod::OriginalPayment);
        assert!(cmd.client_idempotency_key.is_none());
    }
}
