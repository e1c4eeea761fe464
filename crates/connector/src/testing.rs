//! Test doubles shared by the connector, manager, and worker crates.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use refundry_core::{
    GatewayKind, MerchantId, Money, RefundMethod, RefundRequest, Transaction, TransactionId,
    money::Currency, transaction::TransactionStatus,
};
use refundry_credentials::GatewayCredentials;

use crate::connector::Connector;
use crate::error::ConnectorError;
use crate::result::{NormalizedEvent, RefundResult, RefundResultStatus};
use crate::webhook::verify_hmac_sha256;

/// A scriptable [`Connector`] for tests.
///
/// Scripted results are consumed front to back; when the script is empty the
/// mock answers with an accepted `Pending` result carrying the configured
/// gateway reference. Webhook parsing accepts the generic shape
/// `{"events": [{"event_id", "gateway_refund_id", "status"}]}`.
pub struct MockConnector {
    kind: GatewayKind,
    gateway_refund_id: String,
    process_script: Mutex<VecDeque<Result<RefundResult, ConnectorError>>>,
    status_script: Mutex<VecDeque<Result<RefundResult, ConnectorError>>>,
    process_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl MockConnector {
    /// A mock that always accepts, reporting `gateway_refund_id`.
    #[must_use]
    pub fn succeeding(kind: GatewayKind, gateway_refund_id: impl Into<String>) -> Self {
        Self {
            kind,
            gateway_refund_id: gateway_refund_id.into(),
            process_script: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(VecDeque::new()),
            process_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
        }
    }

    /// Queue a scripted result for the next `process_refund` call.
    #[must_use]
    pub fn with_process_result(self, result: Result<RefundResult, ConnectorError>) -> Self {
        self.process_script
            .lock()
            .expect("mock mutex poisoned")
            .push_back(result);
        self
    }

    /// Queue a scripted result for the next `check_refund_status` call.
    #[must_use]
    pub fn with_status_result(self, result: Result<RefundResult, ConnectorError>) -> Self {
        self.status_script
            .lock()
            .expect("mock mutex poisoned")
            .push_back(result);
        self
    }

    /// Number of `process_refund` calls observed.
    pub fn process_calls(&self) -> u32 {
        self.process_calls.load(Ordering::SeqCst)
    }

    /// Number of `check_refund_status` calls observed.
    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn default_result(&self) -> RefundResult {
        RefundResult::accepted(
            self.gateway_refund_id.clone(),
            RefundResultStatus::Pending,
            serde_json::json!({"mock": true}),
        )
    }
}

impl Connector for MockConnector {
    fn kind(&self) -> GatewayKind {
        self.kind
    }

    async fn process_refund(
        &self,
        _refund: &RefundRequest,
        _transaction: &Transaction,
        _credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        match self
            .process_script
            .lock()
            .expect("mock mutex poisoned")
            .pop_front()
        {
            Some(result) => result,
            None => Ok(self.default_result()),
        }
    }

    async fn check_refund_status(
        &self,
        _gateway_refund_id: &str,
        _credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self
            .status_script
            .lock()
            .expect("mock mutex poisoned")
            .pop_front()
        {
            Some(result) => result,
            None => Ok(self.default_result()),
        }
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
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;
        let events = value
            .get("events")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ConnectorError::Serialization("missing events array".into()))?;

        events
            .iter()
            .map(|e| {
                serde_json::from_value::<NormalizedEvent>(e.clone())
                    .map_err(|err| ConnectorError::Serialization(err.to_string()))
            })
            .collect()
    }

    async fn health_check(
        &self,
        _credentials: &GatewayCredentials,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// A refund/transaction pair suitable for adapter tests.
#[must_use]
pub fn refund_fixture() -> (RefundRequest, Transaction) {
    let currency = Currency::parse("USD").expect("valid currency");
    let transaction = Transaction {
        id: TransactionId::from("T1"),
        merchant_id: MerchantId::from("m-1"),
        amount: Money::new(10_000, currency.clone()),
        gateway_kind: GatewayKind::Stripe,
        gateway_transaction_id: "ch_fixture".into(),
        captured_at: chrono::Utc::now(),
        status: TransactionStatus::Captured,
    };
    let refund = RefundRequest::new(
        transaction.id.clone(),
        transaction.merchant_id.clone(),
        Money::new(2_500, currency),
        RefundMethod::OriginalPayment,
        GatewayKind::Stripe,
        "customer_request",
    );
    (refund, transaction)
}

/// Plaintext credentials suitable for adapter tests.
#[must_use]
pub fn credentials_fixture() -> GatewayCredentials {
    serde_json::from_str(r#"{"api_key":"sk_test_mock","webhook_secret":"whsec_mock"}"#)
        .expect("fixture credentials parse")
}
