use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::envelope::QueueMessage;
use crate::queue::{Queue, ReceiptHandle, ReceivedMessage};
use crate::QueueError;

/// A message that exhausted its retries and was removed from circulation.
#[derive(Debug, Clone)]
pub struct DeadLetteredMessage {
    pub message: QueueMessage,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Configuration for the in-memory queue.
#[derive(Debug, Clone)]
pub struct MemoryQueueConfig {
    /// How long a delivery stays invisible before automatic redelivery.
    pub visibility_timeout: Duration,
    /// Internal polling granularity of the long-poll loop.
    pub poll_interval: Duration,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// A pending (deliverable or delayed) message.
#[derive(Debug)]
struct Pending {
    seq: u64,
    ready_at: Instant,
    message: QueueMessage,
}

/// A delivered message awaiting ack/nack.
#[derive(Debug)]
struct InFlight {
    seq: u64,
    visible_at: Instant,
    message: QueueMessage,
}

#[derive(Debug, Default)]
struct Inner {
    pending: Vec<Pending>,
    inflight: HashMap<String, InFlight>,
    dead_letters: Vec<DeadLetteredMessage>,
    next_seq: u64,
}

/// In-memory [`Queue`] with SQS-FIFO-style semantics.
///
/// Grouped messages are delivered in arrival order with at most one in
/// flight per group; expired deliveries are returned to the head of their
/// group with the attempt counter bumped. Suitable for tests and
/// single-process deployments.
///
/// # Thread safety
///
/// All state lives behind one standard [`Mutex`] which is never held across
/// an `.await` point; the long-poll loop reacquires it on every tick.
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    config: MemoryQueueConfig,
}

impl MemoryQueue {
    /// Create an empty queue with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryQueueConfig::default())
    }

    /// Create an empty queue with the given configuration.
    #[must_use]
    pub fn with_config(config: MemoryQueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Number of dead-lettered messages.
    pub fn dead_letter_len(&self) -> usize {
        self.lock().dead_letters.len()
    }

    /// Drain all dead-lettered messages, emptying the buffer.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetteredMessage> {
        std::mem::take(&mut self.lock().dead_letters)
    }

    /// Number of messages waiting for delivery (ready or delayed).
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("queue mutex poisoned")
    }

    /// Move expired in-flight deliveries back to pending, bumping attempts.
    fn requeue_expired(inner: &mut Inner, now: Instant) {
        let expired: Vec<String> = inner
            .inflight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(mut flight) = inner.inflight.remove(&receipt) {
                flight.message.attempt += 1;
                // The original sequence number puts the message back at the
                // head of its group.
                inner.pending.push(Pending {
                    seq: flight.seq,
                    ready_at: now,
                    message: flight.message,
                });
            }
        }
        inner.pending.sort_by_key(|p| p.seq);
    }

    /// Deliver up to `max` messages honoring per-group FIFO.
    fn try_deliver(&self, inner: &mut Inner, max: usize, now: Instant) -> Vec<ReceivedMessage> {
        // Groups that already have an in-flight delivery are blocked.
        let mut blocked: HashSet<String> = inner
            .inflight
            .values()
            .filter_map(|f| f.message.group_key.clone())
            .collect();

        let mut deliveries = Vec::new();
        let mut delivered_seqs = Vec::new();

        for pending in &inner.pending {
            if deliveries.len() >= max {
                break;
            }

            if let Some(group) = &pending.message.group_key {
                if blocked.contains(group) {
                    continue;
                }
                // A not-yet-ready head blocks the rest of its group; a
                // delivered head blocks it too (one in flight per group).
                blocked.insert(group.clone());
                if pending.ready_at > now {
                    continue;
                }
            } else if pending.ready_at > now {
                continue;
            }

            let receipt = ReceiptHandle(Uuid::new_v4().to_string());
            deliveries.push(ReceivedMessage {
                message: pending.message.clone(),
                receipt: receipt.clone(),
                visibility_timeout: self.config.visibility_timeout,
            });
            delivered_seqs.push(pending.seq);
            inner.inflight.insert(
                receipt.0,
                InFlight {
                    seq: pending.seq,
                    visible_at: now + self.config.visibility_timeout,
                    message: pending.message.clone(),
                },
            );
        }

        inner.pending.retain(|p| !delivered_seqs.contains(&p.seq));
        deliveries
    }

    fn push_pending(&self, message: QueueMessage, ready_at: Instant) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.pending.push(Pending {
            seq,
            ready_at,
            message,
        });
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryQueue")
            .field("pending", &inner.pending.len())
            .field("inflight", &inner.inflight.len())
            .field("dead_letters", &inner.dead_letters.len())
            .finish()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn send(&self, message: QueueMessage) -> Result<(), QueueError> {
        self.push_pending(message, Instant::now());
        Ok(())
    }

    async fn send_delayed(
        &self,
        message: QueueMessage,
        delay: Duration,
    ) -> Result<(), QueueError> {
        self.push_pending(message, Instant::now() + delay);
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            let now = Instant::now();
            let deliveries = {
                let mut inner = self.lock();
                Self::requeue_expired(&mut inner, now);
                self.try_deliver(&mut inner, max_messages, now)
            };

            if !deliveries.is_empty() {
                return Ok(deliveries);
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let remaining = deadline - Instant::now();
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut inner = self.lock();
        inner
            .inflight
            .remove(&receipt.0)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))
    }

    async fn nack(&self, receipt: &ReceiptHandle, delay: Duration) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let mut flight = inner
            .inflight
            .remove(&receipt.0)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))?;

        flight.message.attempt += 1;
        let seq = flight.seq;
        inner.pending.push(Pending {
            seq,
            ready_at: Instant::now() + delay,
            message: flight.message,
        });
        inner.pending.sort_by_key(|p| p.seq);
        Ok(())
    }

    async fn extend_visibility(
        &self,
        receipt: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let flight = inner
            .inflight
            .get_mut(&receipt.0)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))?;
        flight.visible_at = Instant::now() + extension;
        Ok(())
    }

    async fn dead_letter(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let flight = inner
            .inflight
            .remove(&receipt.0)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))?;

        inner.dead_letters.push(DeadLetteredMessage {
            message: flight.message,
            reason: reason.to_owned(),
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MessageKind, QueueMessage};
    use refundry_core::{RefundId, RequestContext};

    fn ctx() -> RequestContext {
        RequestContext::with_correlation("corr-q", "test")
    }

    fn grouped(refund: &str) -> QueueMessage {
        QueueMessage::process_refund(&RefundId::from(refund), &ctx())
    }

    fn ungrouped() -> QueueMessage {
        QueueMessage::approval_tick(&ctx())
    }

    #[tokio::test]
    async fn fifo_within_group() {
        let queue = MemoryQueue::new();
        queue.send(grouped("rfd_1")).await.unwrap();
        let mut second = grouped("rfd_1");
        second.kind = MessageKind::CheckGateway;
        queue.send(second).await.unwrap();

        // Only the head of the group is deliverable.
        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message.kind, MessageKind::ProcessRefund);

        // The second message stays blocked while the first is in flight.
        let blocked = queue.receive(10, Duration::ZERO).await.unwrap();
        assert!(blocked.is_empty());

        // Ack the head; the next group member becomes deliverable.
        queue.ack(&batch[0].receipt).await.unwrap();
        let next = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].message.kind, MessageKind::CheckGateway);
    }

    #[tokio::test]
    async fn different_groups_deliver_in_parallel() {
        let queue = MemoryQueue::new();
        queue.send(grouped("rfd_1")).await.unwrap();
        queue.send(grouped("rfd_2")).await.unwrap();
        queue.send(ungrouped()).await.unwrap();

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 3, "independent groups should not block each other");
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_lapse_redelivers_with_bumped_attempt() {
        let queue = MemoryQueue::with_config(MemoryQueueConfig {
            visibility_timeout: Duration::from_secs(5),
            ..MemoryQueueConfig::default()
        });
        queue.send(grouped("rfd_1")).await.unwrap();

        let batch = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(batch[0].message.attempt, 0);

        tokio::time::advance(Duration::from_secs(6)).await;

        let redelivered = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message.attempt, 1);

        // The old receipt is no longer valid.
        let err = queue.ack(&batch[0].receipt).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownReceipt(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn extend_visibility_defers_redelivery() {
        let queue = MemoryQueue::with_config(MemoryQueueConfig {
            visibility_timeout: Duration::from_secs(5),
            ..MemoryQueueConfig::default()
        });
        queue.send(grouped("rfd_1")).await.unwrap();

        let batch = queue.receive(1, Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        queue
            .extend_visibility(&batch[0].receipt, Duration::from_secs(10))
            .await
            .unwrap();

        // Past the original timeout, but inside the extension.
        tokio::time::advance(Duration::from_secs(3)).await;
        let nothing = queue.receive(1, Duration::ZERO).await.unwrap();
        assert!(nothing.is_empty(), "extended delivery must stay invisible");

        queue.ack(&batch[0].receipt).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn nack_redelivers_after_delay() {
        let queue = MemoryQueue::new();
        queue.send(grouped("rfd_1")).await.unwrap();

        let batch = queue.receive(1, Duration::ZERO).await.unwrap();
        queue
            .nack(&batch[0].receipt, Duration::from_secs(30))
            .await
            .unwrap();

        let nothing = queue.receive(1, Duration::ZERO).await.unwrap();
        assert!(nothing.is_empty(), "nacked message honors its delay");

        tokio::time::advance(Duration::from_secs(31)).await;
        let redelivered = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_head_blocks_group() {
        let queue = MemoryQueue::new();
        let head = grouped("rfd_1");
        let head_id = head.message_id.clone();
        queue
            .send_delayed(head, Duration::from_secs(60))
            .await
            .unwrap();
        let mut tail = grouped("rfd_1");
        tail.kind = MessageKind::CheckGateway;
        queue.send(tail).await.unwrap();

        // The tail must not overtake the delayed head.
        let nothing = queue.receive(10, Duration::ZERO).await.unwrap();
        assert!(nothing.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let batch = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(batch[0].message.message_id, head_id);
    }

    #[tokio::test]
    async fn dead_letter_removes_from_circulation() {
        let queue = MemoryQueue::new();
        queue.send(grouped("rfd_1")).await.unwrap();

        let batch = queue.receive(1, Duration::ZERO).await.unwrap();
        queue
            .dead_letter(&batch[0].receipt, "retries exhausted")
            .await
            .unwrap();

        assert_eq!(queue.dead_letter_len(), 1);
        let nothing = queue.receive(1, Duration::ZERO).await.unwrap();
        assert!(nothing.is_empty());

        let drained = queue.drain_dead_letters();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].reason, "retries exhausted");
        assert_eq!(queue.dead_letter_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_returns_message_sent_mid_wait() {
        let queue = std::sync::Arc::new(MemoryQueue::new());

        let receiver = std::sync::Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            receiver.receive(1, Duration::from_secs(10)).await
        });

        tokio::time::advance(Duration::from_millis(100)).await;
        queue.send(ungrouped()).await.unwrap();

        let batch = handle.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }
}
