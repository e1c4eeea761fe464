use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use refundry_core::RequestContext;
use refundry_queue::{MessageKind, Queue, QueueMessage, ReceivedMessage};

use crate::context::WorkerContext;
use crate::handlers::{self, Disposition};
use crate::WorkerError;

/// Drives the queue-consume loop and dispatches messages to handlers.
///
/// Messages within one batch are handled concurrently up to the configured
/// bound; the queue's per-group FIFO guarantees that two gateway-facing
/// messages for the same refund are never in a batch together.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool over the shared context.
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        let semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent));
        Self { ctx, semaphore }
    }

    /// Run until the token cancels. In-flight handlers finish before return.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("worker pool started");
        loop {
            let batch = tokio::select! {
                () = shutdown.cancelled() => break,
                batch = self.ctx.queue.receive(
                    self.ctx.config.batch_size,
                    self.ctx.config.poll_wait,
                ) => batch,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "queue receive failed; backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let mut handles = Vec::with_capacity(batch.len());
            for received in batch {
                let ctx = Arc::clone(&self.ctx);
                let permit = Arc::clone(&self.semaphore)
                    .acquire_owned()
                    .await
                    .expect("semaphore never closes");
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    process_one(&ctx, received).await;
                }));
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "handler task panicked");
                }
            }
        }
        info!("worker pool stopped");
    }

    /// Handle one delivery end to end, including its queue disposition.
    ///
    /// The run loop calls this for every received message; it is public so
    /// embedding code (and tests) can drive the pipeline message by message.
    pub async fn handle(&self, received: ReceivedMessage) {
        process_one(&self.ctx, received).await;
    }

    /// Spawn the periodic producer of `APPROVAL_TICK` sweeps.
    ///
    /// Returns the task handle; it stops when the token cancels.
    pub fn spawn_timers(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.ctx.queue);
        let interval = self.ctx.config.approval_tick_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let ctx = RequestContext::new("scheduler");
                        if let Err(e) = queue.send(QueueMessage::approval_tick(&ctx)).await {
                            warn!(error = %e, "failed to enqueue approval tick");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").finish_non_exhaustive()
    }
}

/// Handle one delivery end to end, including its queue disposition.
pub(crate) async fn process_one(ctx: &WorkerContext, received: ReceivedMessage) {
    let kind = received.message.kind;
    let message_id = received.message.message_id.clone();
    debug!(%kind, %message_id, attempt = received.message.attempt, "handling message");

    let result = match kind {
        MessageKind::ProcessRefund => handlers::process_refund(ctx, &received).await,
        MessageKind::CheckGateway => handlers::check_gateway(ctx, &received).await,
        MessageKind::ApprovalTick => handlers::approval_tick(ctx, &received).await,
        MessageKind::Notify => handlers::notify(ctx, &received).await,
    };

    let disposition = match result {
        Ok(disposition) => disposition,
        Err(WorkerError::LockBusy(refund_id)) => {
            // Someone else holds the refund; hand the message back shortly.
            debug!(%refund_id, "refund lock busy; redelivering");
            Disposition::Retry {
                delay: Duration::from_secs(1),
            }
        }
        Err(e) => {
            // Infrastructure failure: retry with backoff until the attempt
            // ceiling, then dead-letter.
            warn!(error = %e, %kind, "handler failed");
            if received.message.attempt + 1 >= ctx.config.max_attempts {
                Disposition::DeadLetter {
                    reason: format!("handler failed after {} attempts: {e}",
                        received.message.attempt + 1),
                }
            } else {
                Disposition::Retry {
                    delay: ctx.config.retry.delay_for(received.message.attempt),
                }
            }
        }
    };

    let queue_result = match disposition {
        Disposition::Ack => ctx.queue.ack(&received.receipt).await,
        Disposition::Retry { delay } => ctx.queue.nack(&received.receipt, delay).await,
        Disposition::DeadLetter { reason } => {
            ctx.queue.dead_letter(&received.receipt, &reason).await
        }
    };
    if let Err(e) = queue_result {
        // The receipt may have lapsed while we worked; the message will be
        // redelivered and the handler reconciles via stored state.
        warn!(error = %e, %message_id, "queue disposition failed");
    }
}
