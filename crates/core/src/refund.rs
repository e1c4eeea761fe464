use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RefundryError;
use crate::money::Money;
use crate::status::{ApprovalState, RefundStatus, StatusEvent};
use crate::types::{BankAccountId, CustomerId, MerchantId, RefundId, TransactionId};

/// How the refunded funds travel back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundMethod {
    /// Back to the original payment instrument through the capturing gateway.
    OriginalPayment,
    /// Credit to the merchant's internal balance.
    Balance,
    /// Out-of-band transfer to a verified merchant bank account.
    Other,
}

impl RefundMethod {
    /// Short stable tag for log fields and routing keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OriginalPayment => "ORIGINAL_PAYMENT",
            Self::Balance => "BALANCE",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for RefundMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The external payment processor a transaction was captured through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayKind {
    Stripe,
    Checkout,
    /// Internal ACH rail used for the OTHER refund method.
    Ach,
}

impl GatewayKind {
    /// Stable lowercase tag, used in webhook routes and state keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Checkout => "checkout",
            Self::Ach => "ach",
        }
    }

    /// Parse from the lowercase tag used in webhook routes.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "stripe" => Some(Self::Stripe),
            "checkout" => Some(Self::Checkout),
            "ach" => Some(Self::Ach),
            _ => None,
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded failure from a processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProcessingError {
    /// Short error code (e.g. `TIMEOUT`, `GATEWAY_SERVER`).
    pub code: String,
    /// Human-readable message, PII-masked.
    pub message: String,
    /// Whether the failure was classified transient.
    pub retryable: bool,
    /// Zero-based attempt number that produced this error.
    pub attempt: u32,
    /// When the failure was recorded.
    pub occurred_at: DateTime<Utc>,
}

/// The refund aggregate root.
///
/// All mutation goes through [`RefundRequest::transition`] so the status
/// history stays append-only and the legal-transition table is enforced in
/// exactly one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RefundRequest {
    /// Server-generated identifier.
    pub refund_id: RefundId,
    /// The original captured transaction being reversed.
    pub transaction_id: TransactionId,
    /// Owning merchant.
    pub merchant_id: MerchantId,
    /// Optional end customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    /// Required for the OTHER method; must reference a verified account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_account_id: Option<BankAccountId>,

    /// Refund amount in minor units.
    pub amount: Money,
    /// How the funds travel back.
    pub refund_method: RefundMethod,
    /// Free-text reason supplied by the requester.
    pub reason: String,
    /// Optional machine-readable reason code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,

    /// Current lifecycle state.
    pub status: RefundStatus,
    /// Approval gate state.
    #[serde(default)]
    pub approval_state: ApprovalState,

    /// Gateway-side refund reference, set once the gateway acknowledges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
    /// Gateway the original transaction was captured through.
    pub gateway_kind: GatewayKind,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When a worker first dispatched the refund.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// When the refund reached COMPLETED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Gateway-provided settlement estimate, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion_date: Option<DateTime<Utc>>,

    /// Append-only transition log; timestamps strictly increase.
    #[serde(default)]
    pub status_history: Vec<StatusEvent>,
    /// Failures recorded by processing attempts.
    #[serde(default)]
    pub processing_errors: Vec<ProcessingError>,
    /// Number of retryable processing attempts consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Opaque caller-supplied labels.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RefundRequest {
    /// Create a new refund in `Draft` state.
    #[must_use]
    pub fn new(
        transaction_id: TransactionId,
        merchant_id: MerchantId,
        amount: Money,
        refund_method: RefundMethod,
        gateway_kind: GatewayKind,
        reason: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            refund_id: RefundId::generate(),
            transaction_id,
            merchant_id,
            customer_id: None,
            bank_account_id: None,
            amount,
            refund_method,
            reason: reason.into(),
            reason_code: None,
            status: RefundStatus::Draft,
            approval_state: ApprovalState::None,
            gateway_reference: None,
            gateway_kind,
            created_at: now,
            updated_at: now,
            processed_at: None,
            completed_at: None,
            estimated_completion_date: None,
            status_history: Vec::new(),
            processing_errors: Vec::new(),
            retry_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// Attach a customer id.
    #[must_use]
    pub fn with_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    /// Attach a bank account (required for the OTHER method).
    #[must_use]
    pub fn with_bank_account(mut self, bank_account_id: BankAccountId) -> Self {
        self.bank_account_id = Some(bank_account_id);
        self
    }

    /// Attach a machine-readable reason code.
    #[must_use]
    pub fn with_reason_code(mut self, code: impl Into<String>) -> Self {
        self.reason_code = Some(code.into());
        self
    }

    /// Attach opaque metadata labels.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Apply a state transition, appending to the status history.
    ///
    /// Fails with [`RefundryError::InvalidStateTransition`] without mutating
    /// anything when the transition is not in the legal table.
    pub fn transition(
        &mut self,
        to: RefundStatus,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<(), RefundryError> {
        if !self.status.can_transition_to(to) {
            return Err(RefundryError::InvalidStateTransition {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        let now = Utc::now();
        self.status_history.push(StatusEvent {
            from: self.status,
            to,
            actor: actor.into(),
            reason,
            occurred_at: now,
        });
        self.status = to;
        self.updated_at = now;
        match to {
            RefundStatus::Processing if self.processed_at.is_none() => {
                self.processed_at = Some(now);
            }
            RefundStatus::Completed => self.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Record a failed processing attempt. Retryable failures consume a retry.
    pub fn record_processing_error(
        &mut self,
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
        attempt: u32,
    ) {
        self.processing_errors.push(ProcessingError {
            code: code.into(),
            message: message.into(),
            retryable,
            attempt,
            occurred_at: Utc::now(),
        });
        if retryable {
            self.retry_count += 1;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    fn test_refund() -> RefundRequest {
        RefundRequest::new(
            TransactionId::from("T1"),
            MerchantId::from("m-1"),
            Money::new(2500, Currency::parse("USD").unwrap()),
            RefundMethod::OriginalPayment,
            GatewayKind::Stripe,
            "customer_request",
        )
    }

    #[test]
    fn new_refund_starts_in_draft() {
        let r = test_refund();
        assert_eq!(r.status, RefundStatus::Draft);
        assert!(r.status_history.is_empty());
        assert_eq!(r.approval_state, ApprovalState::None);
    }

    #[test]
    fn happy_path_history() {
        let mut r = test_refund();
        r.transition(RefundStatus::Submitted, "system", None).unwrap();
        r.transition(RefundStatus::Processing, "worker", None).unwrap();
        r.transition(RefundStatus::GatewayPending, "worker", None)
            .unwrap();
        r.transition(RefundStatus::Completed, "webhook:stripe", None)
            .unwrap();

        let states: Vec<_> = r.status_history.iter().map(|e| e.to).collect();
        assert_eq!(
            states,
            vec![
                RefundStatus::Submitted,
                RefundStatus::Processing,
                RefundStatus::GatewayPending,
                RefundStatus::Completed,
            ]
        );
        assert!(r.completed_at.is_some());
        assert!(r.processed_at.is_some());
    }

    #[test]
    fn illegal_transition_does_not_mutate() {
        let mut r = test_refund();
        r.transition(RefundStatus::Submitted, "system", None).unwrap();

        let before_history = r.status_history.len();
        let err = r
            .transition(RefundStatus::Completed, "worker", None)
            .unwrap_err();
        assert!(matches!(err, RefundryError::InvalidStateTransition { .. }));
        assert_eq!(r.status, RefundStatus::Submitted);
        assert_eq!(r.status_history.len(), before_history);
    }

    #[test]
    fn terminal_state_rejects_further_transitions() {
        let mut r = test_refund();
        r.transition(RefundStatus::Submitted, "system", None).unwrap();
        r.transition(RefundStatus::Processing, "worker", None).unwrap();
        r.transition(RefundStatus::Completed, "worker", None).unwrap();

        assert!(
            r.transition(RefundStatus::Failed, "poll", None).is_err(),
            "late poll must not regress a terminal state"
        );
    }

    #[test]
    fn history_timestamps_increase() {
        let mut r = test_refund();
        r.transition(RefundStatus::Submitted, "system", None).unwrap();
        r.transition(RefundStatus::Processing, "worker", None).unwrap();
        let ts: Vec<_> = r.status_history.iter().map(|e| e.occurred_at).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn retryable_errors_bump_retry_count() {
        let mut r = test_refund();
        r.record_processing_error("GATEWAY_SERVER", "503 from gateway", true, 0);
        r.record_processing_error("GATEWAY_SERVER", "503 from gateway", true, 1);
        r.record_processing_error("GATEWAY_VALIDATION", "bad request", false, 2);
        assert_eq!(r.retry_count, 2);
        assert_eq!(r.processing_errors.len(), 3);
    }

    #[test]
    fn gateway_kind_tags_roundtrip() {
        for kind in [GatewayKind::Stripe, GatewayKind::Checkout, GatewayKind::Ach] {
            assert_eq!(GatewayKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(GatewayKind::from_tag("paypal"), None);
    }

    #[test]
    fn refund_serde_roundtrip() {
        let mut r = test_refund();
        r.transition(RefundStatus::Submitted, "system", None).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"SUBMITTED\""));
        assert!(json.contains("\"ORIGINAL_PAYMENT\""));
        let back: RefundRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.refund_id, r.refund_id);
        assert_eq!(back.status, RefundStatus::Submitted);
    }
}
