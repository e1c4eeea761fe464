use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use refundry_manager::ManagerError;
use refundry_worker::WorkerError;

/// Errors surfaced through the HTTP API.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A manager-level error surfaced through the API.
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// A worker-level error surfaced through the webhook endpoint.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// A parameter-engine error surfaced through the parameter API.
    #[error(transparent)]
    Param(#[from] refundry_params::ParamError),

    /// An approval-engine error surfaced through the approval API.
    #[error(transparent)]
    Approval(#[from] refundry_approval::ApprovalError),

    /// A repository error surfaced through the bank account API.
    #[error(transparent)]
    Repo(#[from] refundry_repository::RepoError),

    /// Malformed request input not caught by extractors.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Manager(ManagerError::Validation(errors)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": "validation failed", "field_errors": errors }),
            ),
            Self::Manager(ManagerError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("refund not found: {id}") }),
            ),
            Self::Manager(ManagerError::Conflict(msg)) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": msg }),
            ),
            Self::Manager(ManagerError::IllegalState { operation, state }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({
                    "error": format!("state {state} does not permit {operation}"),
                    "code": "INVALID_STATE_TRANSITION",
                }),
            ),
            Self::Manager(ManagerError::LockTimeout(id)) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": format!("refund {id} is busy; retry shortly") }),
            ),
            Self::Worker(WorkerError::SignatureInvalid(gateway)) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": format!("invalid webhook signature for {gateway}") }),
            ),
            Self::Worker(WorkerError::UnknownGateway(gateway)) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("unknown gateway: {gateway}") }),
            ),
            Self::Worker(WorkerError::Serialization(msg)) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": format!("unparsable webhook payload: {msg}") }),
            ),
            Self::Param(refundry_params::ParamError::Unknown(name)) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("unknown parameter: {name}") }),
            ),
            Self::Param(refundry_params::ParamError::Invalid { name, reason }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": format!("invalid value for {name}: {reason}") }),
            ),
            Self::Param(refundry_params::ParamError::Conflict(msg)) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": msg }),
            ),
            Self::Approval(refundry_approval::ApprovalError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("approval not found: {id}") }),
            ),
            Self::Approval(refundry_approval::ApprovalError::AlreadyDecided(status)) => (
                StatusCode::GONE,
                serde_json::json!({ "error": format!("approval already decided: {status}") }),
            ),
            Self::Approval(refundry_approval::ApprovalError::WrongLevel { .. }) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": self.to_string() }),
            ),
            Self::Repo(refundry_repository::RepoError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("not found: {id}") }),
            ),
            Self::Repo(refundry_repository::RepoError::AlreadyExists(id)) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": format!("already exists: {id}") }),
            ),
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": other.to_string() }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}
