//! Refund lifecycle states and the legal-transition table.
//!
//! The transition graph is the authority for every mutation in the system:
//! terminal states are absorbing, so a late gateway poll can never regress a
//! webhook-delivered terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a refund request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    /// Created but not yet submitted for validation.
    Draft,
    /// Accepted and queued for processing.
    Submitted,
    /// Rejected by compliance checks before any side effect.
    ValidationFailed,
    /// Waiting on a human approval decision.
    PendingApproval,
    /// A worker is executing the refund.
    Processing,
    /// The gateway accepted the refund and settlement is pending.
    GatewayPending,
    /// The gateway returned a transient error; eligible for retry.
    GatewayError,
    /// The refund settled.
    Completed,
    /// The refund permanently failed.
    Failed,
    /// An approver rejected the refund.
    Rejected,
    /// The requester canceled before dispatch.
    Canceled,
}

impl RefundStatus {
    /// `true` for absorbing states that admit no further transition.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Rejected
                | Self::Canceled
                | Self::ValidationFailed
        )
    }

    /// `true` while a cancel request can still be honored.
    ///
    /// Once a worker has dispatched to the gateway the side effect is already
    /// issued, so cancellation is only possible before `Processing`.
    #[must_use]
    pub fn is_cancelable(self) -> bool {
        matches!(self, Self::Draft | Self::Submitted | Self::PendingApproval)
    }

    /// `true` when the refund may still be edited by the client.
    #[must_use]
    pub fn is_updatable(self) -> bool {
        matches!(self, Self::Draft | Self::Submitted | Self::PendingApproval)
    }

    /// Check whether `self → next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: RefundStatus) -> bool {
        use RefundStatus as S;
        matches!(
            (self, next),
            (S::Draft, S::Submitted | S::Canceled)
                | (
                    S::Submitted,
                    S::ValidationFailed | S::PendingApproval | S::Processing | S::Canceled
                )
                | (
                    S::PendingApproval,
                    S::Processing | S::Rejected | S::Canceled
                )
                | (
                    S::Processing,
                    S::GatewayPending | S::GatewayError | S::Completed | S::Failed
                )
                | (
                    S::GatewayPending,
                    S::Completed | S::Failed | S::GatewayError
                )
                | (S::GatewayError, S::Processing | S::Failed)
        )
    }

    /// Short stable tag used in log fields and state keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Processing => "PROCESSING",
            Self::GatewayPending => "GATEWAY_PENDING",
            Self::GatewayError => "GATEWAY_ERROR",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Rejected => "REJECTED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval gate state carried on the refund, separate from the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    /// No approval required.
    #[default]
    None,
    /// Waiting on a decision at some level.
    Pending,
    /// Approved at the final required level.
    Approved,
    /// Rejected by an approver.
    Rejected,
    /// Escalated past at least one deadline.
    Escalated,
}

/// A single append-only entry in a refund's status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatusEvent {
    /// State before the transition.
    pub from: RefundStatus,
    /// State after the transition.
    pub to: RefundStatus,
    /// Who drove the transition (`system`, `worker`, a user id, a gateway).
    pub actor: String,
    /// Optional human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the transition was applied.
    pub occurred_at: DateTime<Utc>,
}
