//! Stripe refund adapter.
//!
//! Refunds are created with `POST /v1/refunds` (form-encoded, bearer auth)
//! and polled with `GET /v1/refunds/{id}`. The refund id travels as the
//! `Idempotency-Key` header so a redelivered message cannot double-refund.
//! Webhooks are signed with the `Stripe-Signature` header scheme
//! (`t=<unix>,v1=<hmac>` over `"{t}.{body}"`).

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

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe's refund status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum StripeRefundStatus {
    Succeeded,
    Pending,
    Failed,
    RequiresAction,
    Canceled,
}

impl From<StripeRefundStatus> for RefundResultStatus {
    fn from(status: StripeRefundStatus) -> Self {
        match status {
            StripeRefundStatus::Succeeded => Self::Completed,
            StripeRefundStatus::Pending => Self::Pending,
            StripeRefundStatus::Failed | StripeRefundStatus::Canceled => Self::Failed,
            // Stripe wants out-of-band action; leave it to the status check.
            StripeRefundStatus::RequiresAction => Self::Unknown,
        }
    }
}

/// The subset of Stripe's refund object the adapter reads.
#[derive(Debug, Deserialize)]
pub(crate) struct StripeRefundResponse {
    pub id: String,
    pub amount: i64,
    pub status: Option<StripeRefundStatus>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// One event in a Stripe webhook envelope.
#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: Option<i64>,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// Stripe gateway adapter.
pub struct StripeConnector {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl StripeConnector {
    /// Create an adapter against the production Stripe API.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create an adapter against a custom base URL (tests, mock servers).
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

    fn to_result(response: StripeRefundResponse, raw: serde_json::Value) -> RefundResult {
        let status = response
            .status
            .map_or(RefundResultStatus::Unknown, RefundResultStatus::from);
        let mut result = RefundResult::accepted(response.id, status, raw)
            .with_processed_amount(response.amount);
        if let Some(reason) = response.failure_reason {
            result.error_message = Some(reason);
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
        let parsed: StripeRefundResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;
        Ok(Self::to_result(parsed, raw))
    }
}

impl Default for StripeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for StripeConnector {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    #[instrument(skip_all, fields(refund_id = %refund.refund_id))]
    async fn process_refund(
        &self,
        refund: &RefundRequest,
        transaction: &Transaction,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        let url = format!("{}/v1/refunds", self.base_url);
        debug!(%url, "creating stripe refund");

        let form = [
            ("charge", transaction.gateway_transaction_id.clone()),
            ("amount", refund.amount.amount.to_string()),
            ("metadata[refund_id]", refund.refund_id.to_string()),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(credentials.api_key.expose_secret())
            .header("Idempotency-Key", refund.refund_id.as_str())
            .form(&form)
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
        let url = format!("{}/v1/refunds/{gateway_refund_id}", self.base_url);

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
        // Header format: `t=<unix>,v1=<hex hmac>`; the signed payload is
        // `"{t}.{body}"`.
        let mut timestamp = None;
        let mut v1 = None;
        for part in signature.split(',') {
            match part.split_once('=') {
                Some(("t", t)) => timestamp = Some(t),
                Some(("v1", sig)) => v1 = Some(sig),
                _ => {}
            }
        }
        let (Some(timestamp), Some(v1)) = (timestamp, v1) else {
            return false;
        };

        let mut signed_payload = Vec::with_capacity(timestamp.len() + 1 + payload.len());
        signed_payload.extend_from_slice(timestamp.as_bytes());
        signed_payload.push(b'.');
        signed_payload.extend_from_slice(payload);

        verify_hmac_sha256(secret, &signed_payload, v1)
    }

    fn parse_webhook_events(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, ConnectorError> {
        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;

        // Only refund lifecycle events carry a refund object.
        if !event.event_type.starts_with("charge.refund") && !event.event_type.starts_with("refund.")
        {
            return Ok(Vec::new());
        }

        let object = &event.data.object;
        let refund: StripeRefundResponse = serde_json::from_value(object.clone())
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;

        let status = refund
            .status
            .map_or(RefundResultStatus::Unknown, RefundResultStatus::from);

        Ok(vec![NormalizedEvent {
            event_id: event.id,
            gateway_refund_id: refund.id,
            status,
            occurred_at: event
                .created
                .and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
            raw: object.clone(),
        }])
    }

    async fn health_check(
        &self,
        credentials: &GatewayCredentials,
    ) -> Result<(), ConnectorError> {
        let url = format!("{}/v1/balance", self.base_url);
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
