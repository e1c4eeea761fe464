//! Refund endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use refundry_core::{MerchantId, RefundId, RefundRequest, RefundStatus};
use refundry_manager::{CreateRefund, RefundStatistics, UpdateRefund};
use refundry_repository::RefundFilter;

use crate::ServerError;

use super::{AppState, Correlation};

/// Query parameters for listing refunds.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<RefundStatus>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}
fn default_page_size() -> usize {
    20
}

/// A page of refunds with paging totals.
#[derive(Debug, Serialize, ToSchema)]
pub struct RefundListResponse {
    pub items: Vec<RefundRequest>,
    pub total_items: usize,
    pub total_pages: usize,
    pub current_page: usize,
    pub page_size: usize,
}

/// Query parameters for the statistics endpoint.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsQuery {
    #[serde(default)]
    pub merchant_id: Option<String>,
}

/// `POST /refunds` — create a refund.
#[utoipa::path(
    post,
    path = "/refunds",
    tag = "Refunds",
    request_body = CreateRefund,
    responses(
        (status = 201, description = "Refund accepted", body = RefundRequest),
        (status = 400, description = "Malformed request"),
        (status = 409, description = "Idempotency conflict"),
        (status = 422, description = "Business validation failed"),
    )
)]
pub async fn create(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Json(cmd): Json<CreateRefund>,
) -> Result<impl IntoResponse, ServerError> {
    let ctx = correlation.context("api");
    let refund = state.manager.create(cmd, &ctx).await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

/// `GET /refunds` — list refunds with filters and paging.
#[utoipa::path(
    get,
    path = "/refunds",
    tag = "Refunds",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("merchantId" = Option<String>, Query, description = "Filter by merchant"),
        ("startDate" = Option<String>, Query, description = "Created-at lower bound (RFC 3339)"),
        ("endDate" = Option<String>, Query, description = "Created-at upper bound (RFC 3339)"),
        ("page" = Option<usize>, Query, description = "1-based page number"),
        ("pageSize" = Option<usize>, Query, description = "Page size, 1..=100"),
    ),
    responses((status = 200, description = "A page of refunds", body = RefundListResponse))
)]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<RefundListResponse>, ServerError> {
    if query.page < 1 {
        return Err(ServerError::BadRequest("page must be >= 1".into()));
    }
    if !(1..=100).contains(&query.page_size) {
        return Err(ServerError::BadRequest(
            "pageSize must be between 1 and 100".into(),
        ));
    }

    let filter = RefundFilter {
        merchant_id: query.merchant_id.map(MerchantId::from),
        status: query.status,
        start_date: query.start_date,
        end_date: query.end_date,
    };
    let page = state
        .manager
        .list(&filter, query.page, query.page_size)
        .await?;

    Ok(Json(RefundListResponse {
        items: page.items,
        total_items: page.total_items,
        total_pages: page.total_pages,
        current_page: page.current_page,
        page_size: page.page_size,
    }))
}

/// `GET /refunds/{id}` — fetch one refund.
#[utoipa::path(
    get,
    path = "/refunds/{id}",
    tag = "Refunds",
    params(("id" = String, Path, description = "Refund id")),
    responses(
        (status = 200, description = "The refund", body = RefundRequest),
        (status = 404, description = "Not found"),
    )
)]
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RefundRequest>, ServerError> {
    let refund = state.manager.get(&RefundId::from(id)).await?;
    Ok(Json(refund))
}

/// `PUT /refunds/{id}` — update a refund before processing starts.
#[utoipa::path(
    put,
    path = "/refunds/{id}",
    tag = "Refunds",
    request_body = UpdateRefund,
    params(("id" = String, Path, description = "Refund id")),
    responses(
        (status = 200, description = "The updated refund", body = RefundRequest),
        (status = 404, description = "Not found"),
        (status = 422, description = "State forbids update or validation failed"),
    )
)]
pub async fn update(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Path(id): Path<String>,
    Json(patch): Json<UpdateRefund>,
) -> Result<Json<RefundRequest>, ServerError> {
    let ctx = correlation.context("api");
    let refund = state
        .manager
        .update(&RefundId::from(id), patch, &ctx)
        .await?;
    Ok(Json(refund))
}

/// Body for the cancel endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// `PUT /refunds/{id}/cancel` — cancel a refund before dispatch.
#[utoipa::path(
    put,
    path = "/refunds/{id}/cancel",
    tag = "Refunds",
    request_body = CancelBody,
    params(("id" = String, Path, description = "Refund id")),
    responses(
        (status = 200, description = "The canceled refund", body = RefundRequest),
        (status = 404, description = "Not found"),
        (status = 409, description = "Refund is being processed"),
        (status = 422, description = "State forbids cancel"),
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<RefundRequest>, ServerError> {
    let ctx = correlation.context("api");
    let reason = body.reason.unwrap_or_else(|| "canceled by caller".into());
    let refund = state
        .manager
        .cancel(&RefundId::from(id), reason, &ctx)
        .await?;
    Ok(Json(refund))
}

/// `GET /refunds/statistics` — aggregates.
#[utoipa::path(
    get,
    path = "/refunds/statistics",
    tag = "Refunds",
    params(("merchantId" = Option<String>, Query, description = "Scope to one merchant")),
    responses((status = 200, description = "Aggregates", body = RefundStatistics))
)]
pub async fn statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<RefundStatistics>, ServerError> {
    let stats = state
        .manager
        .statistics(query.merchant_id.map(MerchantId::from))
        .await?;
    Ok(Json(stats))
}
