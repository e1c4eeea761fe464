use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::QueueMessage;
use crate::QueueError;

/// Opaque handle identifying one delivery of a message.
///
/// A new handle is issued on every delivery; handles from a previous
/// delivery of the same message are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message delivered to a consumer, invisible to others until acked,
/// nacked, or its visibility timeout lapses.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message: QueueMessage,
    pub receipt: ReceiptHandle,
    /// The visibility timeout this delivery was made with. Handlers that may
    /// run longer must extend visibility before half of it has elapsed.
    pub visibility_timeout: Duration,
}

/// Trait for queue backends.
///
/// Ordering contract: messages sharing a `group_key` are delivered in
/// arrival order and at most one of them is in flight at a time. Messages
/// without a group key have no ordering relationship.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a message.
    async fn send(&self, message: QueueMessage) -> Result<(), QueueError>;

    /// Enqueue a message that becomes deliverable after `delay`.
    async fn send_delayed(
        &self,
        message: QueueMessage,
        delay: Duration,
    ) -> Result<(), QueueError>;

    /// Long-poll for up to `max_messages`, waiting at most `wait`.
    ///
    /// Returns immediately once at least one message is available; an empty
    /// vec means the wait elapsed with nothing deliverable.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledge successful processing; the message is deleted.
    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Return the message to the queue for redelivery after `delay`, with
    /// its attempt counter incremented.
    async fn nack(&self, receipt: &ReceiptHandle, delay: Duration) -> Result<(), QueueError>;

    /// Push the delivery's invisibility out by `extension` from now.
    async fn extend_visibility(
        &self,
        receipt: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), QueueError>;

    /// Remove the message from circulation into the dead-letter buffer.
    async fn dead_letter(&self, receipt: &ReceiptHandle, reason: &str)
    -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety.
    fn _assert_dyn_queue(_: &dyn Queue) {}
}
