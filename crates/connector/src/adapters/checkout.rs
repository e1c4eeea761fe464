//! Checkout.com refund adapter.
//!
//! Refunds are created with `POST /payments/{payment_id}/refunds`; the API
//! answers `202 Accepted` with an action id, and the final outcome arrives
//! via `payment_refunded` / `payment_refund_declined` webhook events signed
//! with an HMAC-SHA256 hex digest of the raw body in the `cko-signature`
//! header.

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

const DEFAULT_BASE_URL: &str = "https://api.checkout.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `202 Accepted` body from a refund request.
#[derive(Debug, Deserialize)]
pub(crate) struct CheckoutActionResponse {
    pub action_id: String,
    #[serde(default)]
    pub reference: Option<String>,
}

/// One action from `GET /payments/{id}/actions`.
#[derive(Debug, Deserialize)]
pub(crate) struct CheckoutAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub approved: Option<bool>,
}

/// Webhook event envelope.
#[derive(Debug, Deserialize)]
struct CheckoutEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created_on: Option<chrono::DateTime<chrono::Utc>>,
    data: serde_json::Value,
}

/// Map a webhook event type to a normalized status.
pub(crate) fn event_status(event_type: &str) -> Option<RefundResultStatus> {
    match event_type {
        "payment_refunded" => Some(RefundResultStatus::Completed),
        "payment_refund_declined" => Some(RefundResultStatus::Failed),
        "payment_refund_pending" => Some(RefundResultStatus::Pending),
        _ => None,
    }
}

/// Checkout.com gateway adapter.
pub struct CheckoutConnector {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl CheckoutConnector {
    /// Create an adapter against the production Checkout.com API.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create an adapter against a custom base URL (tests, sandbox).
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
}

impl Default for CheckoutConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for CheckoutConnector {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Checkout
    }

    #[instrument(skip_all, fields(refund_id = %refund.refund_id))]
    async fn process_refund(
        &self,
        refund: &RefundRequest,
        transaction: &Transaction,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        let url = format!(
            "{}/payments/{}/refunds",
            self.base_url, transaction.gateway_transaction_id
        );
        debug!(%url, "creating checkout refund");

        let body = serde_json::json!({
            "amount": refund.amount.amount,
            "reference": refund.refund_id,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(credentials.api_key.expose_secret())
            .header("Cko-Idempotency-Key", refund.refund_id.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(&e, self.timeout))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(ConnectorError::from_status(status, &text));
        }

        let raw: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;
        let action: CheckoutActionResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;

        // 202: accepted for asynchronous processing; settlement arrives by
        // webhook.
        Ok(
            RefundResult::accepted(action.action_id, RefundResultStatus::Pending, raw)
                .with_processed_amount(refund.amount.amount)
                .with_response_code(status.to_string()),
        )
    }

    #[instrument(skip_all, fields(gateway_refund_id))]
    async fn check_refund_status(
        &self,
        gateway_refund_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        let url = format!("{}/payments/actions/{gateway_refund_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credentials.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(&e, self.timeout))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(ConnectorError::from_status(status, &text));
        }

        let raw: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;
        let action: CheckoutAction = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;

        let normalized = match (action.action_type.as_str(), action.approved) {
            ("Refund", Some(true)) => RefundResultStatus::Completed,
            ("Refund", Some(false)) => RefundResultStatus::Failed,
            ("Refund", None) => RefundResultStatus::Pending,
            _ => RefundResultStatus::Unknown,
        };

        Ok(RefundResult::accepted(action.id, normalized, raw))
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
        let event: CheckoutEvent = serde_json::from_slice(payload)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;

        let Some(status) = event_status(&event.event_type) else {
            return Ok(Vec::new());
        };

        let action_id = event
            .data
            .get("action_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ConnectorError::Serialization("refund event missing data.action_id".into())
            })?;

        Ok(vec![NormalizedEvent {
            event_id: event.id,
            gateway_refund_id: action_id.to_owned(),
            status,
            occurred_at: event.created_on,
            raw: event.data,
        }])
    }

    async fn health_check(
        &self,
        credentials: &GatewayCredentials,
    ) -> Result<(), ConnectorError> {
        let url = format!("{}/event-types", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(credentials.api_key.expose_secret())
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
    use crate::webhook::compute_hmac_sha256;

    #[test]
    fn event_type_mapping() {
        assert_eq!(
            event_status("payment_refunded"),
            Some(RefundResultStatus::Completed)
        );
        assert_eq!(
            event_status("payment_refund_declined"),
            Some(RefundResultStatus::Failed)
        );
        assert_eq!(event_status("payment_captured"), None);
    }

    #[test]
    fn webhook_signature_is_hmac_of_raw_body() {
        let connector = CheckoutConnector::new();
        let body = br#"{"id":"evt_1","type":"payment_refunded"}"#;
        let sig = compute_hmac_sha256("cko_secret", body);
        assert!(connector.validate_webhook_signature(body, &sig, "cko_secret"));
        assert!(!connector.validate_webhook_signature(body, &sig, "wrong"));
    }

    #[test]
    fn parse_refunded_event() {
        let connector = CheckoutConnector::new();
        let payload = serde_json::json!({
            "id": "evt_cko_1",
            "type": "payment_refunded",
            "created_on": "2026-01-01T00:00:00Z",
            "data": {
                "action_id": "act_1",
                "payment_id": "pay_1",
                "amount": 2500
            }
        });

        let events = connector
            .parse_webhook_events(&serde_json::to_vec(&payload).unwrap())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].gateway_refund_id, "act_1");
        assert_eq!(events[0].status, RefundResultStatus::Completed);
    }

    #[test]
    fn refund_event_without_action_id_is_rejected() {
        let connector = CheckoutConnector::new();
        let payload = serde_json::json!({
            "id": "evt_cko_2",
            "type": "payment_refunded",
            "data": {}
        });

        let err = connector
            .parse_webhook_events(&serde_json::to_vec(&payload).unwrap())
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Serialization(_)));
    }

    #[test]
    fn unrelated_event_is_ignored() {
        let connector = CheckoutConnector::new();
        let payload = serde_json::json!({
            "id": "evt_cko_3",
            "type": "payment_approved",
            "data": { "action_id": "act_9" }
        });

        let events = connector
            .parse_webhook_events(&serde_json::to_vec(&payload).unwrap())
            .unwrap();
        assert!(events.is_empty());
    }
}
