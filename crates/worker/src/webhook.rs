use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use refundry_connector::{NormalizedEvent, RefundResultStatus};
use refundry_core::{GatewayKind, RefundStatus, RequestContext};
use refundry_crypto::ExposeSecret;
use refundry_queue::{Queue, QueueMessage};
use refundry_state::{KeyKind, StateKey, StateStore};

use crate::context::WorkerContext;
use crate::WorkerError;

/// Outcome of ingesting one webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Events applied to refunds.
    pub applied: usize,
    /// Events acknowledged but skipped as replays.
    pub duplicates: usize,
    /// Events that referenced no known refund.
    pub unmatched: usize,
}

/// Verifies, deduplicates, and applies gateway webhooks.
///
/// The HTTP layer hands over the raw request bytes untouched — signature
/// schemes sign the exact bytes on the wire. A verified payload parses into
/// normalized events; each event id is recorded so a redelivered webhook is
/// acknowledged without reprocessing.
pub struct WebhookIngest {
    ctx: Arc<WorkerContext>,
}

impl WebhookIngest {
    /// Create an ingester over the shared worker context.
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Process one webhook request.
    ///
    /// Fails with [`WorkerError::SignatureInvalid`] before parsing anything
    /// when the signature does not verify (the HTTP layer answers 401).
    #[instrument(skip(self, payload, signature), fields(gateway = %gateway))]
    pub async fn ingest(
        &self,
        gateway: GatewayKind,
        payload: &[u8],
        signature: &str,
    ) -> Result<IngestSummary, WorkerError> {
        let connector = self
            .ctx
            .registry
            .get(gateway)
            .map_err(|_| WorkerError::UnknownGateway(gateway.to_string()))?;

        let credentials = self
            .ctx
            .credentials
            .get(&self.ctx.config.webhook_merchant, gateway)
            .await?;

        if !connector.validate_webhook_signature(
            payload,
            signature,
            credentials.webhook_secret.expose_secret(),
        ) {
            return Err(WorkerError::SignatureInvalid(gateway.to_string()));
        }

        let events = connector
            .parse_webhook_events(payload)
            .map_err(|e| WorkerError::Serialization(e.to_string()))?;

        let mut summary = IngestSummary {
            applied: 0,
            duplicates: 0,
            unmatched: 0,
        };

        for event in events {
            if self.is_replay(gateway, &event).await? {
                debug!(event_id = %event.event_id, "duplicate webhook event acknowledged");
                summary.duplicates += 1;
                continue;
            }
            if self.apply_event(gateway, &event).await? {
                summary.applied += 1;
            } else {
                summary.unmatched += 1;
            }
        }

        info!(?summary, "webhook ingested");
        Ok(summary)
    }

    /// Record the event id; `true` when it was already seen.
    async fn is_replay(
        &self,
        gateway: GatewayKind,
        event: &NormalizedEvent,
    ) -> Result<bool, WorkerError> {
        let key = StateKey::global(
            KeyKind::WebhookEvent,
            format!("{gateway}:{}", event.event_id),
        );
        let fresh = self
            .ctx
            .state
            .check_and_set(&key, "seen", Some(self.ctx.config.webhook_replay_ttl))
            .await
            .map_err(|e| WorkerError::State(e.to_string()))?;
        Ok(!fresh)
    }

    /// Apply one event to its refund. Returns `false` when no refund matches
    /// the gateway reference.
    async fn apply_event(
        &self,
        gateway: GatewayKind,
        event: &NormalizedEvent,
    ) -> Result<bool, WorkerError> {
        let Some(refund) = self
            .ctx
            .refunds
            .find_by_gateway_reference(&event.gateway_refund_id)
            .await?
        else {
            warn!(
                gateway_refund_id = %event.gateway_refund_id,
                "webhook references no known refund"
            );
            return Ok(false);
        };

        let request_ctx = RequestContext::new(format!("webhook:{gateway}"));
        let guard = self.ctx.lock_refund(&refund.refund_id).await?;
        let result = self.apply_locked(gateway, event, &refund.refund_id, &request_ctx).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "lock release failed");
        }
        result.map(|()| true)
    }

    async fn apply_locked(
        &self,
        gateway: GatewayKind,
        event: &NormalizedEvent,
        refund_id: &refundry_core::RefundId,
        request_ctx: &RequestContext,
    ) -> Result<(), WorkerError> {
        let mut versioned = self.ctx.refunds.fetch(refund_id).await?;

        // Terminal dominance: once settled, later events are acknowledged
        // and ignored.
        if versioned.refund.status.is_terminal() {
            debug!("refund already terminal; webhook event ignored");
            return Ok(());
        }

        let actor = format!("webhook:{gateway}");
        match event.status {
            RefundResultStatus::Completed => {
                if versioned.refund.status == RefundStatus::GatewayError {
                    versioned
                        .refund
                        .transition(RefundStatus::Processing, &actor, Some("retry".into()))
                        .map_err(|e| WorkerError::State(e.to_string()))?;
                }
                versioned
                    .refund
                    .transition(RefundStatus::Completed, &actor, None)
                    .map_err(|e| WorkerError::State(e.to_string()))?;
                self.ctx
                    .refunds
                    .update(&versioned.refund, versioned.version)
                    .await?;
                self.notify_completed(&versioned.refund).await;
            }
            RefundResultStatus::Failed => {
                versioned
                    .refund
                    .transition(RefundStatus::Failed, &actor, None)
                    .map_err(|e| WorkerError::State(e.to_string()))?;
                self.ctx
                    .refunds
                    .update(&versioned.refund, versioned.version)
                    .await?;
                self.notify_failed(&versioned.refund).await;
            }
            RefundResultStatus::Pending | RefundResultStatus::Processing => {
                // Progress report: make sure the refund sits in
                // GatewayPending awaiting settlement.
                if versioned.refund.status == RefundStatus::Processing {
                    versioned
                        .refund
                        .transition(RefundStatus::GatewayPending, &actor, None)
                        .map_err(|e| WorkerError::State(e.to_string()))?;
                    self.ctx
                        .refunds
                        .update(&versioned.refund, versioned.version)
                        .await?;
                }
            }
            RefundResultStatus::Unknown => {
                // Can't interpret the event; schedule a poll to reconcile.
                self.ctx
                    .queue
                    .send(QueueMessage::check_gateway(refund_id, request_ctx))
                    .await?;
            }
        }

        Ok(())
    }

    async fn notify_completed(&self, refund: &refundry_core::RefundRequest) {
        let event = refundry_notify::NotificationEvent::RefundCompleted {
            refund_id: refund.refund_id.clone(),
            merchant_id: refund.merchant_id.clone(),
            amount_minor: refund.amount.amount,
            currency: refund.amount.currency.as_str().to_owned(),
        };
        if let Err(e) = self.ctx.notifications.dispatch(&event).await {
            warn!(error = %e, "notification dispatch failed");
        }
    }

    async fn notify_failed(&self, refund: &refundry_core::RefundRequest) {
        let event = refundry_notify::NotificationEvent::RefundFailed {
            refund_id: refund.refund_id.clone(),
            merchant_id: refund.merchant_id.clone(),
            reason: "gateway reported failure".into(),
        };
        if let Err(e) = self.ctx.notifications.dispatch(&event).await {
            warn!(error = %e, "notification dispatch failed");
        }
    }
}

impl std::fmt::Debug for WebhookIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookIngest").finish_non_exhaustive()
    }
}
