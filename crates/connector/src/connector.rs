use async_trait::async_trait;

use refundry_core::{GatewayKind, RefundRequest, Transaction};
use refundry_credentials::GatewayCredentials;

use crate::error::ConnectorError;
use crate::result::{NormalizedEvent, RefundResult};

/// Strongly-typed gateway adapter trait with native `async fn`.
///
/// This trait is **not** object-safe because it uses native `async fn`
/// methods. For dynamic dispatch use [`DynConnector`] — every `Connector`
/// automatically implements it via a blanket implementation.
pub trait Connector: Send + Sync {
    /// The gateway this adapter integrates.
    fn kind(&self) -> GatewayKind;

    /// Issue a refund at the gateway.
    ///
    /// Implementations must send the refund id as the vendor idempotency key
    /// so redelivered messages cannot double-refund.
    fn process_refund(
        &self,
        refund: &RefundRequest,
        transaction: &Transaction,
        credentials: &GatewayCredentials,
    ) -> impl std::future::Future<Output = Result<RefundResult, ConnectorError>> + Send;

    /// Poll the gateway for the current status of a previously issued refund.
    fn check_refund_status(
        &self,
        gateway_refund_id: &str,
        credentials: &GatewayCredentials,
    ) -> impl std::future::Future<Output = Result<RefundResult, ConnectorError>> + Send;

    /// Verify an inbound webhook signature against the raw request bytes.
    fn validate_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &str,
    ) -> bool;

    /// Parse a verified webhook payload into normalized events.
    fn parse_webhook_events(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, ConnectorError>;

    /// Verify the adapter can reach its gateway.
    fn health_check(
        &self,
        credentials: &GatewayCredentials,
    ) -> impl std::future::Future<Output = Result<(), ConnectorError>> + Send;
}

/// Object-safe adapter trait for use behind `Arc<dyn DynConnector>`.
///
/// You generally should not implement this directly — implement
/// [`Connector`] and rely on the blanket implementation.
#[async_trait]
pub trait DynConnector: Send + Sync {
    /// The gateway this adapter integrates.
    fn kind(&self) -> GatewayKind;

    /// Issue a refund at the gateway.
    async fn process_refund(
        &self,
        refund: &RefundRequest,
        transaction: &Transaction,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError>;

    /// Poll the gateway for the current status of a previously issued refund.
    async fn check_refund_status(
        &self,
        gateway_refund_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError>;

    /// Verify an inbound webhook signature against the raw request bytes.
    fn validate_webhook_signature(&self, payload: &[u8], signature: &str, secret: &str)
    -> bool;

    /// Parse a verified webhook payload into normalized events.
    fn parse_webhook_events(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, ConnectorError>;

    /// Verify the adapter can reach its gateway.
    async fn health_check(&self, credentials: &GatewayCredentials) -> Result<(), ConnectorError>;
}

/// Blanket implementation bridging the static and dynamic dispatch worlds.
#[async_trait]
impl<T: Connector + Sync> DynConnector for T {
    fn kind(&self) -> GatewayKind {
        Connector::kind(self)
    }

    async fn process_refund(
        &self,
        refund: &RefundRequest,
        transaction: &Transaction,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        Connector::process_refund(self, refund, transaction, credentials).await
    }

    async fn check_refund_status(
        &self,
        gateway_refund_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<RefundResult, ConnectorError> {
        Connector::check_refund_status(self, gateway_refund_id, credentials).await
    }

    fn validate_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &str,
    ) -> bool {
        Connector::validate_webhook_signature(self, payload, signature, secret)
    }

    fn parse_webhook_events(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, ConnectorError> {
        Connector::parse_webhook_events(self, payload)
    }

    async fn health_check(&self, credentials: &GatewayCredentials) -> Result<(), ConnectorError> {
        Connector::health_check(self, credentials).await
    }
}

impl std::fmt::Debug for dyn DynConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynConnector").field("kind", &self.kind()).finish()
    }
}
