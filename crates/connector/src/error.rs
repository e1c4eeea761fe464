use std::time::Duration;

use thiserror::Error;

/// Classified gateway errors.
///
/// Every vendor failure maps into exactly one of these variants; the
/// worker's retry decision comes from [`is_retryable`](Self::is_retryable).
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Transport-level failure before a response was received.
    #[error("connection error: {0}")]
    Connection(String),

    /// The gateway did not respond within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The gateway rejected our credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The gateway rejected the request as malformed or impossible
    /// (bad amount, already-refunded charge).
    #[error("validation rejected: {0}")]
    Validation(String),

    /// The gateway throttled the request.
    #[error("rate limited")]
    RateLimited,

    /// The gateway refused on policy grounds (not a throttle).
    #[error("rejected by gateway policy: {0}")]
    Rejection(String),

    /// The gateway reported an internal failure (5xx).
    #[error("gateway server error: {0}")]
    Server(String),

    /// A request or response body could not be encoded/decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The adapter is misconfigured (bad base URL, missing credentials).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No adapter is registered for the requested gateway.
    #[error("no connector registered for gateway {0}")]
    NotRegistered(String),

    /// Anything the adapter could not classify. Treated retryable: the
    /// follow-up status check reconciles whichever way the call landed.
    #[error("unknown gateway error: {0}")]
    Unknown(String),
}

impl ConnectorError {
    /// `true` when the operation may succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Timeout(_)
                | Self::RateLimited
                | Self::Server(_)
                | Self::Unknown(_)
        )
    }

    /// Short stable code recorded in `processing_errors`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "GATEWAY_CONNECTION",
            Self::Timeout(_) => "GATEWAY_TIMEOUT",
            Self::Authentication(_) => "GATEWAY_AUTHENTICATION",
            Self::Validation(_) => "GATEWAY_VALIDATION",
            Self::RateLimited => "GATEWAY_RATE_LIMITED",
            Self::Rejection(_) => "GATEWAY_REJECTION",
            Self::Server(_) => "GATEWAY_SERVER",
            Self::Serialization(_) => "GATEWAY_SERIALIZATION",
            Self::Configuration(_) => "GATEWAY_CONFIGURATION",
            Self::NotRegistered(_) => "GATEWAY_NOT_REGISTERED",
            Self::Unknown(_) => "GATEWAY_UNKNOWN",
        }
    }

    /// Classify a `reqwest` transport error.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Connection(format!("transport failure: {err}"))
        }
    }

    /// Classify an HTTP status code from a gateway response.
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::Authentication(format!("HTTP {status}")),
            400 | 404 | 422 => Self::Validation(format!("HTTP {status}: {body}")),
            429 => Self::RateLimited,
            500..=599 => Self::Server(format!("HTTP {status}")),
            _ => Self::Unknown(format!("HTTP {status}: {body}")),
        }
    }
}
