use serde::{Deserialize, Serialize};

use refundry_core::{ApprovalId, MerchantId, RefundId};

/// The fixed set of notification-worthy events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    RefundCompleted {
        refund_id: RefundId,
        merchant_id: MerchantId,
        amount_minor: i64,
        currency: String,
    },
    RefundFailed {
        refund_id: RefundId,
        merchant_id: MerchantId,
        reason: String,
    },
    ApprovalRequested {
        refund_id: RefundId,
        approval_id: ApprovalId,
        merchant_id: MerchantId,
        level: String,
        amount_minor: i64,
        currency: String,
    },
    ApprovalEscalated {
        refund_id: RefundId,
        approval_id: ApprovalId,
        merchant_id: MerchantId,
        to_level: String,
    },
    ApprovalDecided {
        refund_id: RefundId,
        approval_id: ApprovalId,
        merchant_id: MerchantId,
        approved: bool,
    },
}

impl NotificationEvent {
    /// Stable tag naming the event's template.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RefundCompleted { .. } => "refund_completed",
            Self::RefundFailed { .. } => "refund_failed",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::ApprovalEscalated { .. } => "approval_escalated",
            Self::ApprovalDecided { .. } => "approval_decided",
        }
    }

    /// The refund the event concerns.
    #[must_use]
    pub fn refund_id(&self) -> &RefundId {
        match self {
            Self::RefundCompleted { refund_id, .. }
            | Self::RefundFailed { refund_id, .. }
            | Self::ApprovalRequested { refund_id, .. }
            | Self::ApprovalEscalated { refund_id, .. }
            | Self::ApprovalDecided { refund_id, .. } => refund_id,
        }
    }
}
