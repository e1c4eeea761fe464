//! Parameter endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use refundry_core::MerchantId;
use refundry_params::{EntityLevel, Parameter, ParameterValue};

use crate::ServerError;

use super::AppState;

/// Query parameters for listing records.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Entity whose records to list (`PROGRAM`, a bank id, an org id, or a
    /// merchant id).
    pub entity_id: String,
}

/// Body for writing a parameter record.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteParameter {
    pub name: String,
    pub entity_level: EntityLevel,
    pub entity_id: String,
    #[schema(value_type = Object)]
    pub value: ParameterValue,
    pub effective_date: DateTime<Utc>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default = "default_overridable")]
    pub overridable: bool,
    pub created_by: String,
}

fn default_overridable() -> bool {
    true
}

/// Query parameters for resolving a value.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveQuery {
    pub merchant_id: String,
}

/// A resolved value with its source level.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    #[schema(value_type = Object)]
    pub value: ParameterValue,
    pub source: String,
}

/// `GET /parameters?entityId=` — list an entity's records.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Parameter>>, ServerError> {
    Ok(Json(state.params.list_for_entity(&query.entity_id).await?))
}

/// `POST /parameters` — write a record at some hierarchy level.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<WriteParameter>,
) -> Result<impl IntoResponse, ServerError> {
    let record = Parameter {
        name: body.name,
        entity_level: body.entity_level,
        entity_id: body.entity_id,
        value: body.value,
        effective_date: body.effective_date,
        expiration_date: body.expiration_date,
        overridable: body.overridable,
        version: 1,
        created_at: Utc::now(),
        created_by: body.created_by,
    };
    state.params.write(record).await?;
    Ok(StatusCode::CREATED)
}

/// `GET /parameters/{name}/resolve?merchantId=` — resolve the effective
/// value for a merchant.
pub async fn resolve(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, ServerError> {
    let resolved = state
        .params
        .resolve(&name, &MerchantId::from(query.merchant_id))
        .await?;
    Ok(Json(ResolveResponse {
        value: resolved.value,
        source: format!("{:?}", resolved.source).to_uppercase(),
    }))
}
