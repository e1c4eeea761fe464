use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use refundry_compliance::{ComplianceEngine, ComplianceError, ComplianceInput};
use refundry_connector::{ConnectorError, RefundResult, RefundResultStatus};
use refundry_core::{RefundId, RefundMethod, RefundRequest, RefundStatus, RequestContext};
use refundry_notify::NotificationEvent;
use refundry_queue::{Queue, QueueMessage, ReceivedMessage};
use refundry_repository::VersionedRefund;

use refundry_approval::EscalationOutcome;

use crate::context::WorkerContext;
use crate::WorkerError;

/// What the pipeline should do with a message after its handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Done; delete the message.
    Ack,
    /// Transient failure; redeliver after the delay.
    Retry { delay: Duration },
    /// Poison or exhausted; move to the dead-letter buffer.
    DeadLetter { reason: String },
}

/// Handle a `PROCESS_REFUND` message.
///
/// Reloads under the refund lock, asserts the state still wants processing,
/// routes by refund method, and maps the gateway result onto the state
/// machine. The gateway reference is persisted before the message can become
/// visible again, so a crashed worker's retry reconciles instead of
/// double-refunding.
#[instrument(skip_all, fields(correlation_id = %received.message.correlation_id))]
pub(crate) async fn process_refund(
    ctx: &WorkerContext,
    received: &ReceivedMessage,
) -> Result<Disposition, WorkerError> {
    let Some(refund_id) = received.message.refund_id() else {
        return Ok(Disposition::DeadLetter {
            reason: "PROCESS_REFUND without refund_id".into(),
        });
    };
    let request_ctx =
        RequestContext::with_correlation(&received.message.correlation_id, "worker");

    let guard = ctx.lock_refund(&refund_id).await?;
    let result = process_refund_locked(ctx, received, &refund_id, &request_ctx).await;
    if let Err(e) = guard.release().await {
        warn!(error = %e, "lock release failed");
    }
    result
}

async fn process_refund_locked(
    ctx: &WorkerContext,
    received: &ReceivedMessage,
    refund_id: &RefundId,
    request_ctx: &RequestContext,
) -> Result<Disposition, WorkerError> {
    // Double-check under the lock: a cancel or a concurrent worker may have
    // moved the refund since this message was enqueued.
    let mut versioned = ctx.refunds.fetch(refund_id).await?;

    match versioned.refund.status {
        RefundStatus::Submitted | RefundStatus::Processing => {}
        // A redelivery after a transient gateway failure resumes the retry
        // path.
        RefundStatus::GatewayError => {
            versioned
                .refund
                .transition(RefundStatus::Processing, "worker", Some("retry".into()))
                .map_err(|e| WorkerError::State(e.to_string()))?;
            versioned.version = ctx
                .refunds
                .update(&versioned.refund, versioned.version)
                .await?;
        }
        status if status.is_terminal() => {
            debug!(%status, "refund already settled; dropping message");
            return Ok(Disposition::Ack);
        }
        status => {
            warn!(%status, "refund not in a processable state; dropping message");
            return Ok(Disposition::Ack);
        }
    }

    // Policy may have changed between accept and process; re-check before
    // spending money.
    if versioned.refund.status == RefundStatus::Submitted {
        if let Some(disposition) = revalidate(ctx, &mut versioned).await? {
            return Ok(disposition);
        }

        versioned
            .refund
            .transition(RefundStatus::Processing, "worker", None)
            .map_err(|e| WorkerError::State(e.to_string()))?;
        versioned.version = ctx
            .refunds
            .update(&versioned.refund, versioned.version)
            .await?;
    }

    // The gateway call may take a while; push invisibility out first.
    ctx.queue
        .extend_visibility(&received.receipt, received.visibility_timeout)
        .await?;

    let outcome = execute_refund(ctx, &versioned.refund).await;
    finish_processing(ctx, received, versioned, outcome, request_ctx).await
}

/// Re-run compliance for a still-`Submitted` refund. Returns a disposition
/// when the refund was rejected.
async fn revalidate(
    ctx: &WorkerContext,
    versioned: &mut VersionedRefund,
) -> Result<Option<Disposition>, WorkerError> {
    let refund = &versioned.refund;
    let transaction = ctx.transactions.fetch(&refund.transaction_id).await?;
    let bank_account = match &refund.bank_account_id {
        Some(id) => ctx.bank_accounts.fetch(&refund.merchant_id, id).await?,
        None => None,
    };
    let prior_refunded_minor = ctx
        .refunds
        .completed_refund_total(&refund.transaction_id)
        .await?;
    let merchant_balance_minor = ctx
        .balances
        .get(&refund.merchant_id, &refund.amount.currency)
        .await?;
    let gateway_supports_refunds = transaction
        .as_ref()
        .map(|t| ctx.registry.get(t.gateway_kind).is_ok())
        .unwrap_or(false);

    let engine = ComplianceEngine::new(&ctx.params);
    let input = ComplianceInput {
        refund,
        transaction: transaction.as_ref(),
        bank_account: bank_account.as_ref(),
        prior_refunded_minor,
        merchant_balance_minor,
        gateway_supports_refunds,
    };

    match engine.validate(&input).await {
        Ok(_) => Ok(None),
        Err(ComplianceError::Rejected(errors)) => {
            let reason = errors
                .iter()
                .map(|e| e.code.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            versioned
                .refund
                .transition(
                    RefundStatus::ValidationFailed,
                    "worker",
                    Some(reason.clone()),
                )
                .map_err(|e| WorkerError::State(e.to_string()))?;
            ctx.refunds
                .update(&versioned.refund, versioned.version)
                .await?;
            notify_failed(ctx, &versioned.refund, &reason).await;
            Ok(Some(Disposition::Ack))
        }
        Err(ComplianceError::Param(e)) => Err(WorkerError::State(e.to_string())),
    }
}

/// Route a `Processing` refund to its execution path.
async fn execute_refund(
    ctx: &WorkerContext,
    refund: &RefundRequest,
) -> Result<RefundResult, ConnectorError> {
    match refund.refund_method {
        RefundMethod::Balance => {
            // Internal credit path: funds move off the merchant balance and
            // settle immediately.
            ctx.balances
                .debit(
                    &refund.merchant_id,
                    &refund.amount.currency,
                    refund.amount.amount,
                )
                .await
                .map_err(|e| ConnectorError::Unknown(e.to_string()))?;
            Ok(RefundResult::accepted(
                format!("balance:{}", refund.refund_id),
                RefundResultStatus::Completed,
                serde_json::json!({"path": "balance"}),
            )
            .with_processed_amount(refund.amount.amount))
        }
        RefundMethod::OriginalPayment | RefundMethod::Other => {
            let connector = ctx.registry.get(refund.gateway_kind)?;
            let transaction = ctx
                .transactions
                .fetch(&refund.transaction_id)
                .await
                .map_err(|e| ConnectorError::Unknown(e.to_string()))?
                .ok_or_else(|| {
                    ConnectorError::Validation(format!(
                        "transaction {} disappeared",
                        refund.transaction_id
                    ))
                })?;
            let credentials = ctx
                .credentials
                .get(&refund.merchant_id, refund.gateway_kind)
                .await
                .map_err(|e| match e {
                    refundry_credentials::CredentialError::NotFound { .. } => {
                        ConnectorError::Configuration(e.to_string())
                    }
                    other => ConnectorError::Connection(other.to_string()),
                })?;
            connector
                .process_refund(refund, &transaction, &credentials)
                .await
        }
    }
}

/// Map the gateway outcome onto the state machine and the queue.
async fn finish_processing(
    ctx: &WorkerContext,
    received: &ReceivedMessage,
    mut versioned: VersionedRefund,
    outcome: Result<RefundResult, ConnectorError>,
    request_ctx: &RequestContext,
) -> Result<Disposition, WorkerError> {
    let attempt = received.message.attempt;

    match outcome {
        Ok(result) if result.success => {
            // Store the gateway reference before the message can become
            // visible again.
            if let Some(reference) = &result.gateway_refund_id {
                versioned.refund.gateway_reference = Some(reference.clone());
            }
            if let Some(eta) = result.estimated_settlement_date {
                versioned.refund.estimated_completion_date = Some(eta);
            }

            match result.status {
                RefundResultStatus::Completed => {
                    versioned
                        .refund
                        .transition(RefundStatus::Completed, "worker", None)
                        .map_err(|e| WorkerError::State(e.to_string()))?;
                    ctx.refunds
                        .update(&versioned.refund, versioned.version)
                        .await?;
                    notify_completed(ctx, &versioned.refund).await;
                    info!(refund_id = %versioned.refund.refund_id, "refund completed");
                    Ok(Disposition::Ack)
                }
                RefundResultStatus::Pending | RefundResultStatus::Processing => {
                    versioned
                        .refund
                        .transition(RefundStatus::GatewayPending, "worker", None)
                        .map_err(|e| WorkerError::State(e.to_string()))?;
                    ctx.refunds
                        .update(&versioned.refund, versioned.version)
                        .await?;
                    schedule_check(ctx, &versioned.refund.refund_id, 0, request_ctx).await?;
                    Ok(Disposition::Ack)
                }
                RefundResultStatus::Unknown => {
                    // The vendor status did not map; keep Processing and let
                    // a follow-up check resolve it rather than guessing.
                    ctx.refunds
                        .update(&versioned.refund, versioned.version)
                        .await?;
                    schedule_check(ctx, &versioned.refund.refund_id, 0, request_ctx).await?;
                    Ok(Disposition::Ack)
                }
                RefundResultStatus::Failed => {
                    // success=true with Failed does not happen from our
                    // adapters; treat as unknown and reconcile.
                    ctx.refunds
                        .update(&versioned.refund, versioned.version)
                        .await?;
                    schedule_check(ctx, &versioned.refund.refund_id, 0, request_ctx).await?;
                    Ok(Disposition::Ack)
                }
            }
        }
        Ok(result) => {
            // Gateway answered with a failure result.
            let code = result
                .error_code
                .clone()
                .unwrap_or_else(|| "GATEWAY_FAILED".into());
            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| "gateway reported failure".into());
            if result.retryable {
                fail_transient(ctx, versioned, &code, &message, attempt).await
            } else {
                fail_terminal(ctx, versioned, &code, &message, attempt).await
            }
        }
        Err(err) => {
            let code = err.code().to_owned();
            let message = err.to_string();
            if err.is_retryable() {
                fail_transient(ctx, versioned, &code, &message, attempt).await
            } else {
                fail_terminal(ctx, versioned, &code, &message, attempt).await
            }
        }
    }
}

/// A transient failure: record it, park in `GatewayError`, and either retry
/// with backoff or exhaust into the dead-letter buffer.
async fn fail_transient(
    ctx: &WorkerContext,
    mut versioned: VersionedRefund,
    code: &str,
    message: &str,
    attempt: u32,
) -> Result<Disposition, WorkerError> {
    versioned
        .refund
        .record_processing_error(code, message, true, attempt);
    if versioned.refund.status == RefundStatus::Processing {
        versioned
            .refund
            .transition(
                RefundStatus::GatewayError,
                "worker",
                Some(code.to_owned()),
            )
            .map_err(|e| WorkerError::State(e.to_string()))?;
    }

    let exhausted = attempt + 1 >= ctx.config.max_attempts;
    if exhausted {
        versioned
            .refund
            .transition(
                RefundStatus::Failed,
                "worker",
                Some("retries exhausted".into()),
            )
            .map_err(|e| WorkerError::State(e.to_string()))?;
        ctx.refunds
            .update(&versioned.refund, versioned.version)
            .await?;
        notify_failed(ctx, &versioned.refund, "retries exhausted").await;
        warn!(refund_id = %versioned.refund.refund_id, attempt, "refund failed: retries exhausted");
        return Ok(Disposition::DeadLetter {
            reason: format!("retries exhausted after {} attempts: {code}", attempt + 1),
        });
    }

    ctx.refunds
        .update(&versioned.refund, versioned.version)
        .await?;
    let delay = ctx.config.retry.delay_for(attempt);
    debug!(refund_id = %versioned.refund.refund_id, attempt, ?delay, "transient gateway failure; will retry");
    Ok(Disposition::Retry { delay })
}

/// A terminal failure: the refund moves to its absorbing failure state.
async fn fail_terminal(
    ctx: &WorkerContext,
    mut versioned: VersionedRefund,
    code: &str,
    message: &str,
    attempt: u32,
) -> Result<Disposition, WorkerError> {
    versioned
        .refund
        .record_processing_error(code, message, false, attempt);
    versioned
        .refund
        .transition(RefundStatus::Failed, "worker", Some(code.to_owned()))
        .map_err(|e| WorkerError::State(e.to_string()))?;
    ctx.refunds
        .update(&versioned.refund, versioned.version)
        .await?;
    notify_failed(ctx, &versioned.refund, message).await;
    warn!(refund_id = %versioned.refund.refund_id, code, "refund failed terminally");
    Ok(Disposition::Ack)
}

/// Handle a `CHECK_GATEWAY` message.
///
/// Polls the gateway for a pending refund's settlement status. Terminal
/// states recorded by a webhook are absorbing; a late poll never regresses
/// them.
#[instrument(skip_all, fields(correlation_id = %received.message.correlation_id))]
pub(crate) async fn check_gateway(
    ctx: &WorkerContext,
    received: &ReceivedMessage,
) -> Result<Disposition, WorkerError> {
    let Some(refund_id) = received.message.refund_id() else {
        return Ok(Disposition::DeadLetter {
            reason: "CHECK_GATEWAY without refund_id".into(),
        });
    };
    let request_ctx =
        RequestContext::with_correlation(&received.message.correlation_id, "worker");

    let guard = ctx.lock_refund(&refund_id).await?;
    let result = check_gateway_locked(ctx, received, &refund_id, &request_ctx).await;
    if let Err(e) = guard.release().await {
        warn!(error = %e, "lock release failed");
    }
    result
}

async fn check_gateway_locked(
    ctx: &WorkerContext,
    received: &ReceivedMessage,
    refund_id: &RefundId,
    request_ctx: &RequestContext,
) -> Result<Disposition, WorkerError> {
    let mut versioned = ctx.refunds.fetch(refund_id).await?;

    if versioned.refund.status.is_terminal() {
        debug!("refund already terminal; poll result ignored");
        return Ok(Disposition::Ack);
    }
    if !matches!(
        versioned.refund.status,
        RefundStatus::Processing | RefundStatus::GatewayPending | RefundStatus::GatewayError
    ) {
        warn!(status = %versioned.refund.status, "refund not poll-eligible; dropping");
        return Ok(Disposition::Ack);
    }

    let Some(reference) = versioned.refund.gateway_reference.clone() else {
        warn!("no gateway reference to poll; dropping");
        return Ok(Disposition::Ack);
    };

    let connector = match ctx.registry.get(versioned.refund.gateway_kind) {
        Ok(connector) => connector,
        Err(e) => {
            warn!(error = %e, "connector vanished for pending refund");
            return Ok(Disposition::Ack);
        }
    };
    let credentials = ctx
        .credentials
        .get(&versioned.refund.merchant_id, versioned.refund.gateway_kind)
        .await?;

    match connector.check_refund_status(&reference, &credentials).await {
        Ok(result) => match result.status {
            RefundResultStatus::Completed => {
                advance_to_completed(&mut versioned.refund)?;
                ctx.refunds
                    .update(&versioned.refund, versioned.version)
                    .await?;
                notify_completed(ctx, &versioned.refund).await;
                info!("poll observed settlement; refund completed");
                Ok(Disposition::Ack)
            }
            RefundResultStatus::Failed => {
                versioned
                    .refund
                    .transition(
                        RefundStatus::Failed,
                        "worker",
                        result.error_code.clone(),
                    )
                    .map_err(|e| WorkerError::State(e.to_string()))?;
                ctx.refunds
                    .update(&versioned.refund, versioned.version)
                    .await?;
                let reason = result
                    .error_message
                    .unwrap_or_else(|| "gateway reported failure".into());
                notify_failed(ctx, &versioned.refund, &reason).await;
                Ok(Disposition::Ack)
            }
            RefundResultStatus::Pending
            | RefundResultStatus::Processing
            | RefundResultStatus::Unknown => {
                ensure_gateway_pending(&mut versioned.refund)?;
                ctx.refunds
                    .update(&versioned.refund, versioned.version)
                    .await?;
                if received.message.attempt < ctx.config.max_poll_attempts {
                    schedule_check(
                        ctx,
                        refund_id,
                        received.message.attempt + 1,
                        request_ctx,
                    )
                    .await?;
                } else {
                    warn!("poll ceiling reached; waiting on webhook to settle");
                }
                Ok(Disposition::Ack)
            }
        },
        Err(err) if err.is_retryable() => {
            if received.message.attempt + 1 >= ctx.config.max_attempts {
                Ok(Disposition::DeadLetter {
                    reason: format!("status poll exhausted: {err}"),
                })
            } else {
                Ok(Disposition::Retry {
                    delay: ctx.config.retry.delay_for(received.message.attempt),
                })
            }
        }
        Err(err) => {
            // A terminal poll error (bad credentials, vendor 4xx) does not
            // fail the refund; the side effect may well have succeeded. Park
            // and let the webhook or an operator resolve it.
            versioned.refund.record_processing_error(
                err.code(),
                err.to_string(),
                false,
                received.message.attempt,
            );
            ctx.refunds
                .update(&versioned.refund, versioned.version)
                .await?;
            warn!(error = %err, "terminal poll failure; polling stopped");
            Ok(Disposition::Ack)
        }
    }
}

/// Legal route to `Completed` from any poll-eligible state.
fn advance_to_completed(refund: &mut RefundRequest) -> Result<(), WorkerError> {
    if refund.status == RefundStatus::GatewayError {
        refund
            .transition(RefundStatus::Processing, "worker", Some("retry".into()))
            .map_err(|e| WorkerError::State(e.to_string()))?;
    }
    refund
        .transition(RefundStatus::Completed, "worker", None)
        .map_err(|e| WorkerError::State(e.to_string()))
}

/// Legal route to `GatewayPending` from any poll-eligible state.
fn ensure_gateway_pending(refund: &mut RefundRequest) -> Result<(), WorkerError> {
    match refund.status {
        RefundStatus::GatewayPending => Ok(()),
        RefundStatus::Processing => refund
            .transition(RefundStatus::GatewayPending, "worker", None)
            .map_err(|e| WorkerError::State(e.to_string())),
        RefundStatus::GatewayError => {
            refund
                .transition(RefundStatus::Processing, "worker", Some("retry".into()))
                .map_err(|e| WorkerError::State(e.to_string()))?;
            refund
                .transition(RefundStatus::GatewayPending, "worker", None)
                .map_err(|e| WorkerError::State(e.to_string()))
        }
        _ => Ok(()),
    }
}

/// Handle an `APPROVAL_TICK` sweep.
#[instrument(skip_all)]
pub(crate) async fn approval_tick(
    ctx: &WorkerContext,
    received: &ReceivedMessage,
) -> Result<Disposition, WorkerError> {
    let request_ctx =
        RequestContext::with_correlation(&received.message.correlation_id, "worker");
    let escalations = ctx.approvals.tick(chrono::Utc::now()).await?;

    for escalation in escalations {
        let request = &escalation.request;
        match &escalation.outcome {
            EscalationOutcome::Escalated { to_level } => {
                ctx.manager.record_escalation(&request.refund_id).await?;
                dispatch(
                    ctx,
                    NotificationEvent::ApprovalEscalated {
                        refund_id: request.refund_id.clone(),
                        approval_id: request.approval_id.clone(),
                        merchant_id: request.merchant_id.clone(),
                        to_level: to_level.clone(),
                    },
                )
                .await;
            }
            EscalationOutcome::AutoApproved => {
                ctx.manager
                    .record_decision(&request.refund_id, true, &request_ctx)
                    .await?;
                dispatch(
                    ctx,
                    NotificationEvent::ApprovalDecided {
                        refund_id: request.refund_id.clone(),
                        approval_id: request.approval_id.clone(),
                        merchant_id: request.merchant_id.clone(),
                        approved: true,
                    },
                )
                .await;
            }
            EscalationOutcome::AutoRejected => {
                ctx.manager
                    .record_decision(&request.refund_id, false, &request_ctx)
                    .await?;
                dispatch(
                    ctx,
                    NotificationEvent::ApprovalDecided {
                        refund_id: request.refund_id.clone(),
                        approval_id: request.approval_id.clone(),
                        merchant_id: request.merchant_id.clone(),
                        approved: false,
                    },
                )
                .await;
            }
        }
    }

    Ok(Disposition::Ack)
}

/// Handle a `NOTIFY` message.
#[instrument(skip_all, fields(correlation_id = %received.message.correlation_id))]
pub(crate) async fn notify(
    ctx: &WorkerContext,
    received: &ReceivedMessage,
) -> Result<Disposition, WorkerError> {
    let event: NotificationEvent =
        match serde_json::from_value(received.message.payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                return Ok(Disposition::DeadLetter {
                    reason: format!("undecodable NOTIFY payload: {e}"),
                });
            }
        };
    dispatch(ctx, event).await;
    Ok(Disposition::Ack)
}

/// Enqueue a delayed settlement poll.
async fn schedule_check(
    ctx: &WorkerContext,
    refund_id: &RefundId,
    attempt: u32,
    request_ctx: &RequestContext,
) -> Result<(), WorkerError> {
    let mut message = QueueMessage::check_gateway(refund_id, request_ctx);
    message.attempt = attempt;
    ctx.queue
        .send_delayed(message, ctx.config.poll_delay)
        .await?;
    Ok(())
}

async fn dispatch(ctx: &WorkerContext, event: NotificationEvent) {
    if let Err(e) = ctx.notifications.dispatch(&event).await {
        warn!(error = %e, "notification dispatch failed");
    }
}

async fn notify_completed(ctx: &WorkerContext, refund: &RefundRequest) {
    dispatch(
        ctx,
        NotificationEvent::RefundCompleted {
            refund_id: refund.refund_id.clone(),
            merchant_id: refund.merchant_id.clone(),
            amount_minor: refund.amount.amount,
            currency: refund.amount.currency.as_str().to_owned(),
        },
    )
    .await;
}

async fn notify_failed(ctx: &WorkerContext, refund: &RefundRequest, reason: &str) {
    dispatch(
        ctx,
        NotificationEvent::RefundFailed {
            refund_id: refund.refund_id.clone(),
            merchant_id: refund.merchant_id.clone(),
            reason: reason.to_owned(),
        },
    )
    .await;
}
