//! Bank account endpoints.
//!
//! Account numbers are envelope-encrypted before persistence; responses only
//! ever carry the last four digits.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use refundry_core::{
    bank_account::{AccountType, BankAccount, BankAccountStatus},
    mask_account_number, BankAccountId, MerchantId, VerificationStatus,
};

use crate::ServerError;

use super::AppState;

/// Body for creating a bank account.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBankAccount {
    pub merchant_id: String,
    pub holder_name: String,
    pub account_type: AccountType,
    pub routing_number: String,
    /// Full account number; encrypted at rest, never echoed back.
    pub account_number: String,
    #[serde(default)]
    pub is_default: bool,
}

/// A bank account as exposed over the API — no encrypted material.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BankAccountResponse {
    pub account_id: String,
    pub merchant_id: String,
    pub holder_name: String,
    pub account_type: AccountType,
    pub routing_number_masked: String,
    pub account_number_last4: String,
    pub status: BankAccountStatus,
    pub verification_status: VerificationStatus,
    pub is_default: bool,
}

impl From<BankAccount> for BankAccountResponse {
    fn from(account: BankAccount) -> Self {
        Self {
            account_id: account.account_id.to_string(),
            merchant_id: account.merchant_id.to_string(),
            holder_name: account.holder_name,
            account_type: account.account_type,
            routing_number_masked: mask_account_number(&account.routing_number),
            account_number_last4: account.account_number_last4,
            status: account.status,
            verification_status: account.verification_status,
            is_default: account.is_default,
        }
    }
}

/// Query parameters for listing accounts.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub merchant_id: String,
}

/// `POST /bank-accounts` — register an account for out-of-band refunds.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBankAccount>,
) -> Result<impl IntoResponse, ServerError> {
    let digits: String = body
        .account_number
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    if digits.len() < 5 {
        return Err(ServerError::BadRequest(
            "accountNumber must contain at least 5 digits".into(),
        ));
    }
    if body.routing_number.len() != 9 || !body.routing_number.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ServerError::BadRequest(
            "routingNumber must be 9 digits".into(),
        ));
    }

    // The clear account number stops here: only the envelope and the last
    // four digits are persisted.
    let encrypted_account_number = match &state.encryptor {
        Some(encryptor) => encryptor
            .encrypt_str(&digits)
            .map_err(|e| ServerError::Config(format!("encryption failed: {e}")))?,
        None => digits.clone(),
    };
    let last4 = digits[digits.len() - 4..].to_owned();

    let account = BankAccount {
        account_id: BankAccountId::from(format!("ba_{}", uuid::Uuid::new_v4().simple())),
        merchant_id: MerchantId::from(body.merchant_id),
        holder_name: body.holder_name,
        account_type: body.account_type,
        routing_number: body.routing_number,
        account_number_last4: last4,
        encrypted_account_number,
        status: BankAccountStatus::Active,
        verification_status: VerificationStatus::Unverified,
        is_default: body.is_default,
    };

    state.manager.bank_accounts().insert(&account).await?;
    Ok((
        StatusCode::CREATED,
        Json(BankAccountResponse::from(account)),
    ))
}

/// `GET /bank-accounts?merchantId=` — list a merchant's accounts.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BankAccountResponse>>, ServerError> {
    let accounts = state
        .manager
        .bank_accounts()
        .list(&MerchantId::from(query.merchant_id))
        .await?;
    Ok(Json(
        accounts.into_iter().map(BankAccountResponse::from).collect(),
    ))
}

/// `PUT /bank-accounts/{id}/default` — make an account the merchant default.
pub async fn set_default(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<StatusCode, ServerError> {
    state
        .manager
        .bank_accounts()
        .set_default(
            &MerchantId::from(query.merchant_id),
            &BankAccountId::from(id),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body for recording a verification outcome.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationBody {
    pub merchant_id: String,
    pub verification_status: VerificationStatus,
}

/// `PUT /bank-accounts/{id}/verification` — record verification progress.
pub async fn set_verification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<VerificationBody>,
) -> Result<Json<BankAccountResponse>, ServerError> {
    let account = state
        .manager
        .bank_accounts()
        .set_verification(
            &MerchantId::from(body.merchant_id),
            &BankAccountId::from(id),
            body.verification_status,
        )
        .await?;
    Ok(Json(BankAccountResponse::from(account)))
}
