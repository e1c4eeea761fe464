use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the Refundry system.
#[derive(Debug, Error)]
pub enum RefundryError {
    /// Input failed a schema or business invariant check.
    #[error("validation error: {0}")]
    Validation(String),

    /// A state transition outside the legal table was attempted.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: &'static str,
        to: &'static str,
    },

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Two operations collided on the same idempotency key or version.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller lacks authority for the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A distributed lock could not be acquired within the ceiling.
    #[error("lock timeout on {0}")]
    LockTimeout(String),

    /// The lock lease was lost before the commit.
    #[error("lock lost on {0}")]
    LockLost(String),

    /// Gateway-facing failure; retryability carried by the flag.
    #[error("gateway error [{code}]: {message}")]
    Gateway {
        code: String,
        message: String,
        retryable: bool,
    },

    /// Serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Anything unexpected. Always logged with the correlation id.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RefundryError {
    /// `true` when a worker should re-enqueue the triggering message.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway { retryable, .. } => *retryable,
            Self::LockTimeout(_) => true,
            _ => false,
        }
    }
}

/// A per-field validation failure surfaced to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FieldError {
    /// Offending field, dotted-path form (`amount`, `bank_account_id`).
    pub field: String,
    /// Stable machine-readable code (`MAX_REFUND_AMOUNT_EXCEEDED`).
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl FieldError {
    /// Create a new field error.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_retryability_follows_flag() {
        let transient = RefundryError::Gateway {
            code: "GATEWAY_SERVER".into(),
            message: "503".into(),
            retryable: true,
        };
        let terminal = RefundryError::Gateway {
            code: "GATEWAY_VALIDATION".into(),
            message: "bad amount".into(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!terminal.is_retryable());
    }

    #[test]
    fn lock_timeout_is_retryable() {
        assert!(RefundryError::LockTimeout("refund:r1".into()).is_retryable());
        assert!(!RefundryError::LockLost("refund:r1".into()).is_retryable());
    }

    #[test]
    fn validation_is_terminal() {
        assert!(!RefundryError::Validation("bad".into()).is_retryable());
        assert!(!RefundryError::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn display_formats() {
        let err = RefundryError::InvalidStateTransition {
            from: "COMPLETED",
            to: "FAILED",
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition: COMPLETED -> FAILED"
        );

        let fe = FieldError::new("amount", "MAX_REFUND_AMOUNT_EXCEEDED", "exceeds remaining");
        assert_eq!(
            fe.to_string(),
            "amount: exceeds remaining (MAX_REFUND_AMOUNT_EXCEEDED)"
        );
    }
}
