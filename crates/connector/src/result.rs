use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized refund status reported by a gateway.
///
/// A vendor status the adapter does not recognize maps to `Unknown` — never
/// silently to `Pending` — and the worker schedules a follow-up status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundResultStatus {
    /// The gateway is still executing the refund.
    Processing,
    /// Accepted; settlement pending.
    Pending,
    /// Settled.
    Completed,
    /// Permanently failed at the gateway.
    Failed,
    /// The adapter could not map the vendor status.
    Unknown,
}

impl RefundResultStatus {
    /// `true` for statuses that end the refund's gateway lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Normalized outcome of a gateway refund call or status check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    /// Whether the gateway accepted the operation.
    pub success: bool,
    /// Gateway-side refund reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_refund_id: Option<String>,
    pub status: RefundResultStatus,
    /// Amount the gateway reports as processed, in minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_settlement_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Vendor response code as received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_response_code: Option<String>,
    /// Whether a failure outcome is worth retrying.
    #[serde(default)]
    pub retryable: bool,
    /// The raw vendor response for audit trails.
    #[serde(default)]
    pub raw_response: serde_json::Value,
}

impl RefundResult {
    /// Build a success result with the given status and gateway reference.
    #[must_use]
    pub fn accepted(
        gateway_refund_id: impl Into<String>,
        status: RefundResultStatus,
        raw_response: serde_json::Value,
    ) -> Self {
        Self {
            success: true,
            gateway_refund_id: Some(gateway_refund_id.into()),
            status,
            processed_amount: None,
            processing_date: Some(Utc::now()),
            estimated_settlement_date: None,
            error_code: None,
            error_message: None,
            gateway_response_code: None,
            retryable: false,
            raw_response,
        }
    }

    /// Build a failure result.
    #[must_use]
    pub fn failed(
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        retryable: bool,
        raw_response: serde_json::Value,
    ) -> Self {
        Self {
            success: false,
            gateway_refund_id: None,
            status: RefundResultStatus::Failed,
            processed_amount: None,
            processing_date: None,
            estimated_settlement_date: None,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
            gateway_response_code: None,
            retryable,
            raw_response,
        }
    }

    /// Set the processed amount.
    #[must_use]
    pub fn with_processed_amount(mut self, amount: i64) -> Self {
        self.processed_amount = Some(amount);
        self
    }

    /// Set the gateway's settlement estimate.
    #[must_use]
    pub fn with_settlement_estimate(mut self, at: DateTime<Utc>) -> Self {
        self.estimated_settlement_date = Some(at);
        self
    }

    /// Set the vendor response code.
    #[must_use]
    pub fn with_response_code(mut self, code: impl Into<String>) -> Self {
        self.gateway_response_code = Some(code.into());
        self
    }
}

/// A webhook payload parsed into one normalized event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// The gateway's event id, recorded for replay protection.
    pub event_id: String,
    /// Gateway-side refund reference the event concerns.
    pub gateway_refund_id: String,
    pub status: RefundResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    /// The raw vendor event for audit trails.
    #[serde(default)]
    pub raw: serde_json::Value,
}
