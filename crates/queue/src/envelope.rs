use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use refundry_core::{RefundId, RequestContext};

/// The kind of work a queue message requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Execute a refund against its gateway / internal path.
    ProcessRefund,
    /// Poll the gateway for the settlement status of a pending refund.
    CheckGateway,
    /// Sweep approval requests past their escalation deadline.
    ApprovalTick,
    /// Render and deliver a notification event.
    Notify,
}

impl MessageKind {
    /// `true` for kinds that talk to a payment gateway and therefore require
    /// per-refund FIFO ordering.
    #[must_use]
    pub fn is_gateway_facing(self) -> bool {
        matches!(self, Self::ProcessRefund | Self::CheckGateway)
    }

    /// Short stable tag for log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessRefund => "PROCESS_REFUND",
            Self::CheckGateway => "CHECK_GATEWAY",
            Self::ApprovalTick => "APPROVAL_TICK",
            Self::Notify => "NOTIFY",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON envelope travelling on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message id (UUID v7, time-ordered).
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Kind-specific payload.
    pub payload: serde_json::Value,
    /// Deduplicates redeliveries of the same logical operation.
    pub idempotency_key: String,
    /// Zero-based delivery attempt counter, bumped on each redelivery.
    #[serde(default)]
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// FIFO group; gateway-facing messages group by refund id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// Correlation id propagated from the originating request.
    pub correlation_id: String,
}

impl QueueMessage {
    /// Create a message with a fresh id and the context's correlation id.
    #[must_use]
    pub fn new(kind: MessageKind, payload: serde_json::Value, ctx: &RequestContext) -> Self {
        let message_id = Uuid::now_v7().to_string();
        Self {
            idempotency_key: format!("{kind}:{message_id}"),
            message_id,
            kind,
            payload,
            attempt: 0,
            enqueued_at: Utc::now(),
            group_key: None,
            correlation_id: ctx.correlation_id.clone(),
        }
    }

    /// Build a `PROCESS_REFUND` message, FIFO-grouped by refund id.
    #[must_use]
    pub fn process_refund(refund_id: &RefundId, ctx: &RequestContext) -> Self {
        let mut msg = Self::new(
            MessageKind::ProcessRefund,
            serde_json::json!({ "refund_id": refund_id }),
            ctx,
        );
        msg.idempotency_key = format!("process:{refund_id}");
        msg.group_key = Some(refund_id.to_string());
        msg
    }

    /// Build a `CHECK_GATEWAY` message, FIFO-grouped by refund id.
    #[must_use]
    pub fn check_gateway(refund_id: &RefundId, ctx: &RequestContext) -> Self {
        let mut msg = Self::new(
            MessageKind::CheckGateway,
            serde_json::json!({ "refund_id": refund_id }),
            ctx,
        );
        msg.group_key = Some(refund_id.to_string());
        msg
    }

    /// Build an `APPROVAL_TICK` sweep message.
    #[must_use]
    pub fn approval_tick(ctx: &RequestContext) -> Self {
        Self::new(MessageKind::ApprovalTick, serde_json::Value::Null, ctx)
    }

    /// Build a `NOTIFY` message carrying a rendered notification event.
    #[must_use]
    pub fn notify(event: serde_json::Value, ctx: &RequestContext) -> Self {
        Self::new(MessageKind::Notify, event, ctx)
    }

    /// Extract the refund id from a gateway-facing payload.
    #[must_use]
    pub fn refund_id(&self) -> Option<RefundId> {
        self.payload
            .get("refund_id")
            .and_then(|v| v.as_str())
            .map(RefundId::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::with_correlation("corr-1", "test")
    }

    #[test]
    fn process_refund_is_grouped() {
        let msg = QueueMessage::process_refund(&RefundId::from("rfd_1"), &ctx());
        assert_eq!(msg.kind, MessageKind::ProcessRefund);
        assert_eq!(msg.group_key.as_deref(), Some("rfd_1"));
        assert_eq!(msg.idempotency_key, "process:rfd_1");
        assert_eq!(msg.correlation_id, "corr-1");
        assert_eq!(msg.refund_id(), Some(RefundId::from("rfd_1")));
    }

    #[test]
    fn approval_tick_is_ungrouped() {
        let msg = QueueMessage::approval_tick(&ctx());
        assert!(msg.group_key.is_none());
        assert!(msg.refund_id().is_none());
    }

    #[test]
    fn gateway_facing_kinds() {
        assert!(MessageKind::ProcessRefund.is_gateway_facing());
        assert!(MessageKind::CheckGateway.is_gateway_facing());
        assert!(!MessageKind::ApprovalTick.is_gateway_facing());
        assert!(!MessageKind::Notify.is_gateway_facing());
    }

    #[test]
    fn envelope_serde_uses_type_tag() {
        let msg = QueueMessage::check_gateway(&RefundId::from("rfd_2"), &ctx());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"CHECK_GATEWAY\""));
        let back: QueueMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, MessageKind::CheckGateway);
        assert_eq!(back.group_key.as_deref(), Some("rfd_2"));
    }
}
