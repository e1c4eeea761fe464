//! Approval decision endpoints.
//!
//! Decisions flow through the approval engine first; a final-level outcome
//! is then applied to the refund via the manager, which enqueues processing
//! on approval.

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use refundry_approval::DecisionOutcome;
use refundry_core::ApprovalId;

use crate::ServerError;

use super::{AppState, Correlation};

/// Body for approve/reject calls.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DecisionBody {
    /// Who is deciding.
    pub approver: String,
    /// The approver's level; must match the request's current level.
    pub level: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Response for decision calls.
#[derive(Debug, Serialize, ToSchema)]
pub struct DecisionResponse {
    pub approval_id: String,
    pub refund_id: String,
    /// `APPROVED`, `REJECTED`, or `ADVANCED`.
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_level: Option<String>,
}

/// Public view of an approval request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApprovalView {
    pub approval_id: String,
    pub refund_id: String,
    pub status: String,
    pub rule: String,
    pub current_level: String,
    pub required_levels: Vec<String>,
    pub escalation_deadline: String,
    pub escalations: u32,
}

/// `GET /approvals/{id}` — inspect an approval request.
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApprovalView>, ServerError> {
    let request = state.approvals.get(&ApprovalId::from(id)).await?;
    Ok(Json(ApprovalView {
        approval_id: request.approval_id.to_string(),
        refund_id: request.refund_id.to_string(),
        status: request.status.to_string(),
        rule: request.rule.clone(),
        current_level: request.current_level_name().to_owned(),
        required_levels: request.required_levels.clone(),
        escalation_deadline: request.escalation_deadline.to_rfc3339(),
        escalations: request.escalations,
    }))
}

/// `POST /approvals/{id}/approve`
pub async fn approve(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<DecisionResponse>, ServerError> {
    decide(state, correlation, id, body, true).await
}

/// `POST /approvals/{id}/reject`
pub async fn reject(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<DecisionResponse>, ServerError> {
    decide(state, correlation, id, body, false).await
}

async fn decide(
    state: AppState,
    correlation: Correlation,
    id: String,
    body: DecisionBody,
    approve: bool,
) -> Result<Json<DecisionResponse>, ServerError> {
    let approval_id = ApprovalId::from(id);
    let ctx = correlation.context(&format!("approver:{}", body.approver));

    let (request, outcome) = state
        .approvals
        .decide(&approval_id, &body.approver, &body.level, approve, body.comment)
        .await?;

    let (outcome_tag, next_level) = match &outcome {
        DecisionOutcome::Approved => {
            state
                .manager
                .record_decision(&request.refund_id, true, &ctx)
                .await?;
            ("APPROVED", None)
        }
        DecisionOutcome::Rejected => {
            state
                .manager
                .record_decision(&request.refund_id, false, &ctx)
                .await?;
            ("REJECTED", None)
        }
        DecisionOutcome::Advanced { next_level } => ("ADVANCED", Some(next_level.clone())),
    };

    Ok(Json(DecisionResponse {
        approval_id: request.approval_id.to_string(),
        refund_id: request.refund_id.to_string(),
        outcome: outcome_tag.to_owned(),
        next_level,
    }))
}
