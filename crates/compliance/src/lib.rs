//! Layered refund validation.
//!
//! Checks run in five layers: schema, transaction, amount policy, method
//! eligibility, and parameter-driven rules. Within a layer every failure is
//! collected before surfacing; between layers the first failing layer
//! short-circuits (later layers would read fields the earlier layer already
//! proved unusable).

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use refundry_core::{
    BankAccount, FieldError, RefundMethod, RefundRequest, Transaction,
};
use refundry_params::{catalog, ParamError, ParameterResolver};

/// Everything the validator needs that the manager looked up beforehand.
///
/// The validator itself only reaches out for parameters; entity reads
/// (transaction, bank account, balances) happen on the manager's write path
/// where the repository handles are.
#[derive(Debug)]
pub struct ComplianceInput<'a> {
    pub refund: &'a RefundRequest,
    /// The original transaction, when it exists.
    pub transaction: Option<&'a Transaction>,
    /// The referenced bank account, when one was supplied and found.
    pub bank_account: Option<&'a BankAccount>,
    /// Σ of completed refund amounts for the transaction, minor units.
    pub prior_refunded_minor: i64,
    /// The merchant's current balance, minor units.
    pub merchant_balance_minor: i64,
    /// Whether a connector for the transaction's gateway is registered.
    pub gateway_supports_refunds: bool,
}

/// Verdict of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceOutcome {
    /// Whether the refund must pass the approval gate before processing.
    pub approval_required: bool,
}

/// Errors from validation.
#[derive(Debug, Error)]
pub enum ComplianceError {
    /// The refund failed one validation layer; all of that layer's field
    /// errors are carried.
    #[error("refund failed validation with {} field error(s)", .0.len())]
    Rejected(Vec<FieldError>),

    /// Parameter resolution failed; the refund cannot be judged.
    #[error("parameter resolution failed: {0}")]
    Param(#[from] ParamError),
}

/// The layered validator.
pub struct ComplianceEngine<'a> {
    params: &'a ParameterResolver,
}

impl<'a> ComplianceEngine<'a> {
    /// Create a validator over the given parameter resolver.
    #[must_use]
    pub fn new(params: &'a ParameterResolver) -> Self {
        Self { params }
    }

    /// Run all layers. Returns the verdict, or the first failing layer's
    /// collected field errors.
    #[instrument(skip_all, fields(refund_id = %input.refund.refund_id))]
    pub async fn validate(
        &self,
        input: &ComplianceInput<'_>,
    ) -> Result<ComplianceOutcome, ComplianceError> {
        self.check_schema(input)?;
        self.check_transaction(input).await?;
        self.check_amount_policy(input).await?;
        self.check_method_eligibility(input)?;
        self.check_parameter_rules(input).await
    }

    /// Layer 1: required fields and basic shape.
    fn check_schema(&self, input: &ComplianceInput<'_>) -> Result<(), ComplianceError> {
        let refund = input.refund;
        let mut errors = Vec::new();

        if refund.amount.amount <= 0 {
            errors.push(FieldError::new(
                "amount",
                "AMOUNT_NOT_POSITIVE",
                "refund amount must be a positive number of minor units",
            ));
        }
        if refund.reason.trim().is_empty() {
            errors.push(FieldError::new(
                "reason",
                "REASON_REQUIRED",
                "a refund reason is required",
            ));
        }
        if refund.refund_method == RefundMethod::Other && refund.bank_account_id.is_none() {
            errors.push(FieldError::new(
                "bank_account_id",
                "BANK_ACCOUNT_REQUIRED",
                "the OTHER refund method requires a bank account",
            ));
        }

        reject_if_any(errors)
    }

    /// Layer 2: transaction presence and refund window.
    async fn check_transaction(
        &self,
        input: &ComplianceInput<'_>,
    ) -> Result<(), ComplianceError> {
        let refund = input.refund;
        let mut errors = Vec::new();

        let Some(transaction) = input.transaction else {
            return Err(ComplianceError::Rejected(vec![FieldError::new(
                "transaction_id",
                "TRANSACTION_NOT_FOUND",
                format!("transaction {} does not exist", refund.transaction_id),
            )]));
        };

        if transaction.merchant_id != refund.merchant_id {
            errors.push(FieldError::new(
                "transaction_id",
                "TRANSACTION_NOT_FOUND",
                "transaction does not belong to this merchant",
            ));
        }
        if !transaction.is_refundable() {
            errors.push(FieldError::new(
                "transaction_id",
                "TRANSACTION_NOT_REFUNDABLE",
                format!("transaction is in state {:?}", transaction.status),
            ));
        }
        if transaction.amount.currency != refund.amount.currency {
            errors.push(FieldError::new(
                "currency",
                "CURRENCY_MISMATCH",
                format!(
                    "refund currency {} does not match transaction currency {}",
                    refund.amount.currency, transaction.amount.currency
                ),
            ));
        }

        let max_age_days = self
            .params
            .resolve(catalog::MAX_REFUND_AGE_DAYS, &refund.merchant_id)
            .await?
            .value
            .as_i64()
            .unwrap_or(90);
        let age_days = (Utc::now() - transaction.captured_at).num_days();
        if age_days > max_age_days {
            errors.push(FieldError::new(
                "transaction_id",
                "REFUND_WINDOW_EXPIRED",
                format!("transaction captured {age_days} days ago exceeds the {max_age_days}-day window"),
            ));
        }

        reject_if_any(errors)
    }

    /// Layer 3: amount against remaining refundable value and the cap.
    async fn check_amount_policy(
        &self,
        input: &ComplianceInput<'_>,
    ) -> Result<(), ComplianceError> {
        let refund = input.refund;
        let transaction = input
            .transaction
            .expect("layer 2 established transaction presence");
        let mut errors = Vec::new();

        let remaining = transaction.amount.amount - input.prior_refunded_minor;
        if refund.amount.amount > remaining {
            errors.push(FieldError::new(
                "amount",
                "MAX_REFUND_AMOUNT_EXCEEDED",
                format!(
                    "amount {} exceeds remaining refundable {} (captured {}, already refunded {})",
                    refund.amount.amount,
                    remaining,
                    transaction.amount.amount,
                    input.prior_refunded_minor
                ),
            ));
        }

        let cap = self
            .params
            .resolve(catalog::MAX_REFUND_AMOUNT, &refund.merchant_id)
            .await?
            .value
            .as_i64()
            .unwrap_or(0);
        if cap > 0 && refund.amount.amount > cap {
            errors.push(FieldError::new(
                "amount",
                "PER_REFUND_CAP_EXCEEDED",
                format!("amount {} exceeds the per-refund cap {cap}", refund.amount.amount),
            ));
        }

        reject_if_any(errors)
    }

    /// Layer 4: the chosen method must be usable.
    fn check_method_eligibility(
        &self,
        input: &ComplianceInput<'_>,
    ) -> Result<(), ComplianceError> {
        let refund = input.refund;
        let mut errors = Vec::new();

        match refund.refund_method {
            RefundMethod::OriginalPayment => {
                if !input.gateway_supports_refunds {
                    errors.push(FieldError::new(
                        "refund_method",
                        "GATEWAY_REFUNDS_UNSUPPORTED",
                        format!(
                            "gateway {} cannot refund this transaction",
                            refund.gateway_kind
                        ),
                    ));
                }
            }
            RefundMethod::Balance => {
                if input.merchant_balance_minor < refund.amount.amount {
                    errors.push(FieldError::new(
                        "refund_method",
                        "INSUFFICIENT_BALANCE",
                        format!(
                            "merchant balance {} cannot cover {}",
                            input.merchant_balance_minor, refund.amount.amount
                        ),
                    ));
                }
            }
            RefundMethod::Other => match input.bank_account {
                None => {
                    errors.push(FieldError::new(
                        "bank_account_id",
                        "BANK_ACCOUNT_NOT_FOUND",
                        "the referenced bank account does not exist",
                    ));
                }
                Some(account) => {
                    if account.merchant_id != refund.merchant_id {
                        errors.push(FieldError::new(
                            "bank_account_id",
                            "BANK_ACCOUNT_NOT_OWNED",
                            "the bank account belongs to a different merchant",
                        ));
                    } else if !account.is_usable() {
                        errors.push(FieldError::new(
                            "bank_account_id",
                            "BANK_ACCOUNT_NOT_VERIFIED",
                            format!(
                                "bank account is {:?}/{:?}",
                                account.status, account.verification_status
                            ),
                        ));
                    }
                }
            },
        }

        reject_if_any(errors)
    }

    /// Layer 5: parameter-driven rules — reason-code requirement and the
    /// approval threshold.
    async fn check_parameter_rules(
        &self,
        input: &ComplianceInput<'_>,
    ) -> Result<ComplianceOutcome, ComplianceError> {
        let refund = input.refund;
        let mut errors = Vec::new();

        let reason_code_required = self
            .params
            .resolve(catalog::REASON_CODE_REQUIRED, &refund.merchant_id)
            .await?
            .value
            .as_bool()
            .unwrap_or(false);
        if reason_code_required && refund.reason_code.is_none() {
            errors.push(FieldError::new(
                "reason_code",
                "REASON_CODE_REQUIRED",
                "merchant policy requires a machine-readable reason code",
            ));
        }

        reject_if_any(errors)?;

        let threshold = self
            .params
            .resolve(catalog::APPROVAL_THRESHOLD, &refund.merchant_id)
            .await?
            .value
            .as_i64()
            .unwrap_or(-1);
        let approval_required = threshold >= 0 && refund.amount.amount >= threshold;

        Ok(ComplianceOutcome { approval_required })
    }
}

fn reject_if_any(errors: Vec<FieldError>) -> Result<(), ComplianceError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ComplianceError::Rejected(errors))
    }
}
