//! HTTP API wiring.

pub mod approvals;
pub mod bank_accounts;
pub mod health;
pub mod parameters;
pub mod refunds;
pub mod webhooks;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use refundry_approval::ApprovalEngine;
use refundry_core::RequestContext;
use refundry_crypto::EnvelopeEncryptor;
use refundry_manager::RefundManager;
use refundry_params::ParameterResolver;
use refundry_worker::WebhookIngest;

/// The `X-Correlation-ID` header.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RefundManager>,
    pub approvals: Arc<ApprovalEngine>,
    pub params: Arc<ParameterResolver>,
    pub ingest: Arc<WebhookIngest>,
    /// Encrypts bank account numbers before they are persisted. `None` only
    /// in development setups without a master key.
    pub encryptor: Option<Arc<EnvelopeEncryptor>>,
}

/// Correlation id request extension, set by [`correlation_middleware`].
#[derive(Debug, Clone)]
pub struct Correlation(pub String);

impl Correlation {
    /// Build the request context handlers thread downstream.
    #[must_use]
    pub fn context(&self, actor: &str) -> RequestContext {
        RequestContext::with_correlation(self.0.clone(), actor)
    }
}

/// Accept or generate the correlation id and echo it on the response.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), ToOwned::to_owned);

    request
        .extensions_mut()
        .insert(Correlation(correlation.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/refunds", post(refunds::create).get(refunds::list))
        .route("/refunds/statistics", get(refunds::statistics))
        .route("/refunds/{id}", get(refunds::get_one).put(refunds::update))
        .route("/refunds/{id}/cancel", put(refunds::cancel))
        .route(
            "/bank-accounts",
            post(bank_accounts::create).get(bank_accounts::list),
        )
        .route(
            "/bank-accounts/{id}/default",
            put(bank_accounts::set_default),
        )
        .route(
            "/bank-accounts/{id}/verification",
            put(bank_accounts::set_verification),
        )
        .route(
            "/parameters",
            get(parameters::list).post(parameters::create),
        )
        .route("/parameters/{name}/resolve", get(parameters::resolve))
        .route("/approvals/{id}", get(approvals::get_one))
        .route("/approvals/{id}/approve", post(approvals::approve))
        .route("/approvals/{id}/reject", post(approvals::reject))
        .route("/webhooks/{gateway}", post(webhooks::receive))
        .layer(axum::middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
