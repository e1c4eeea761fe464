//! Gateway webhook endpoint.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use refundry_core::GatewayKind;
use refundry_worker::WorkerError;

use crate::ServerError;

use super::AppState;

/// Acknowledgement returned once every event is parsed and enqueued.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub applied: usize,
    pub duplicates: usize,
    pub unmatched: usize,
}

/// The header each gateway signs its payloads into.
fn signature_header(gateway: GatewayKind) -> &'static str {
    match gateway {
        GatewayKind::Stripe => "stripe-signature",
        GatewayKind::Checkout => "cko-signature",
        GatewayKind::Ach => "x-ach-signature",
    }
}

/// `POST /webhooks/{gateway}` — receive a gateway webhook.
///
/// The raw request bytes feed signature verification untouched. Responds 401
/// on a bad signature and 200 only after every event has been verified,
/// deduplicated, and applied or enqueued.
#[utoipa::path(
    post,
    path = "/webhooks/{gateway}",
    tag = "Webhooks",
    params(("gateway" = String, Path, description = "Gateway tag: stripe, checkout, ach")),
    responses(
        (status = 200, description = "Events accepted", body = WebhookAck),
        (status = 401, description = "Invalid signature"),
        (status = 404, description = "Unknown gateway"),
    )
)]
pub async fn receive(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServerError> {
    let gateway = GatewayKind::from_tag(&gateway)
        .ok_or_else(|| ServerError::Worker(WorkerError::UnknownGateway(gateway)))?;

    let signature = headers
        .get(signature_header(gateway))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Worker(WorkerError::SignatureInvalid(gateway.to_string())))?;

    let summary = state.ingest.ingest(gateway, &body, signature).await?;

    Ok(Json(WebhookAck {
        applied: summary.applied,
        duplicates: summary.duplicates,
        unmatched: summary.unmatched,
    }))
}
