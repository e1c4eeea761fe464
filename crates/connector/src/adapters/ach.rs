//! ACH transfer adapter for the out-of-band (OTHER) refund path.
//!
//! Talks to the internal transfer service, which owns bank-account-number
//! lookup; this adapter only ever sends the opaque `bank_account_id`, so raw
//! account numbers never transit this layer. Transfers settle on the ACH
//! clock, so a successful submission always lands in `Processing` and the
//! terminal outcome arrives via status checks or signed webhooks.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use refundry_core::{GatewayKind, RefundRequest, Transaction};
use refundry_credentials::GatewayCredentials;
use refundry_crypto::ExposeSecret;

use crate::connector::Connector;
use crate::error::ConnectorError;
use crate::result::{NormalizedEvent, RefundResult, RefundResultStatus};
use crate::webhook::verify_hmac_sha256;

const DEFAULT_BASE_URL: &str = "http://transfer-service.internal";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transfer service status vocabulary.
pub(crate) fn transfer_status(status: &str) -> RefundResultStatus {
    match status {
        "submitted" => RefundResultStatus::Processing,
        "pending" => RefundResultStatus::Pending,
        "settled" => RefundResultStatus::Completed,
        "returned" | "rejected" => RefundResultStatus::Failed,
        _ => RefundResultStatus::Unknown,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransferResponse {
    pub transfer_id: String,
    pub status: String,
    #[serde(default)]
    pub estimated_settlement: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub return_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferEvent {
    event_id: String,
    transfer_id: String,
    status: String,
    #[serde(default)]
    occurred_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// ACH transfer adapter.
pub struct AchConnector {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl AchConnector {
    /// Create an adapter against the internal transfer service.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create an adapter against a custom base URL (tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let timeout = DEFAULT_TIMEOUT;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn to_result(parsed: TransferResponse, raw: serde_json::Value) -> RefundResult {
        let status = transfer_status(&parsed.status);
        let mut result = RefundResult::accepted(parsed.transfer_id, status, raw);
        if let Some(eta) = parsed.estimated_settlement {
            result = result.with_settlement_estimate(eta);
        }
        if let Some(code) = parsed.return_code {
            result.error_code = Some(code);
        }
        result
    }

    async fn parse_response(
        response: reqwest::Response,
    ) -> Result<RefundResult, ConnectorError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(ConnectorError::from_status(status, &body));
        }

        let raw: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;
        let parsed: TransferResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;
        Ok(Self::to_result(parsed, raw))
    }
}

impl Default for AchConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for AchConnector {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Ach
    }

    #[instrument(skip_all, fields(refund_id = %refund.refund_id))]
    async fn process_refund(
        &self,
        refund: &RefundRequest,
        _transaction: &Transaction,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        let bank_account_id = refund.bank_account_id.as_ref().ok_or_else(|| {
            ConnectorError::Validation("ACH refund requires a bank_account_id".into())
        })?;

        let url = format!("{}/v1/transfers", self.base_url);
        debug!(%url, "submitting ach transfer");

        let body = serde_json::json!({
            "reference": refund.refund_id,
            "bank_account_id": bank_account_id,
            "amount": refund.amount.amount,
            "currency": refund.amount.currency,
            "direction": "credit",
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(credentials.api_key.expose_secret())
            .header("Idempotency-Key", refund.refund_id.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(&e, self.timeout))?;

        Self::parse_response(response).await
    }

    #[instrument(skip_all, fields(gateway_refund_id))]
    async fn check_refund_status(
        &self,
        gateway_refund_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        let url = format!("{}/v1/transfers/{gateway_refund_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credentials.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(&e, self.timeout))?;

        Self::parse_response(response).await
    }

    fn validate_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &str,
    ) -> bool {
        verify_hmac_sha256(secret, payload, signature)
    }

    fn parse_webhook_events(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, ConnectorError> {
        let event: TransferEvent = serde_json::from_slice(payload)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;

        Ok(vec![NormalizedEvent {
            event_id: event.event_id,
            gateway_refund_id: event.transfer_id,
            status: transfer_status(&event.status),
            occurred_at: event.occurred_at,
            raw: serde_json::from_slice(payload)
                .map_err(|e| ConnectorError::Serialization(e.to_string()))?,
        }])
    }

    async fn health_check(
        &self,
        _credentials: &GatewayCredentials,
    ) -> Result<(), ConnectorError> {
        let url = format!("{}/healthz", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(&e, self.timeout))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(ConnectorError::from_status(status, ""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credentials_fixture, refund_fixture};
    use crate::webhook::compute_hmac_sha256;

    #[test]
    fn status_vocabulary() {
        assert_eq!(transfer_status("submitted"), RefundResultStatus::Processing);
        assert_eq!(transfer_status("pending"), RefundResultStatus::Pending);
        assert_eq!(transfer_status("settled"), RefundResultStatus::Completed);
        assert_eq!(transfer_status("returned"), RefundResultStatus::Failed);
        assert_eq!(transfer_status("rejected"), RefundResultStatus::Failed);
        assert_eq!(transfer_status("weird"), RefundResultStatus::Unknown);
    }

    #[tokio::test]
    async fn refund_without_bank_account_is_rejected() {
        let connector = AchConnector::new();
        let (refund, transaction) = refund_fixture();
        // The fixture has no bank account attached.
        let err = connector
            .process_refund(&refund, &transaction, &credentials_fixture())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Validation(_)));
    }

    #[test]
    fn parse_settlement_event() {
        let connector = AchConnector::new();
        let payload = serde_json::json!({
            "event_id": "ach_evt_1",
            "transfer_id": "tr_1",
            "status": "settled",
            "occurred_at": "2026-01-05T00:00:00Z"
        });
        let bytes = serde_json::to_vec(&payload).unwrap();

        let events = connector.parse_webhook_events(&bytes).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, RefundResultStatus::Completed);
        assert_eq!(events[0].gateway_refund_id, "tr_1");
    }

    #[test]
    fn webhook_signature() {
        let connector = AchConnector::new();
        let body = br#"{"event_id":"e","transfer_id":"t","status":"settled"}"#;
        let sig = compute_hmac_sha256("ach_secret", body);
        assert!(connector.validate_webhook_signature(body, &sig, "ach_secret"));
        assert!(!connector.validate_webhook_signature(body, "bad", "ach_secret"));
    }
}
