//! Queue abstraction connecting the refund manager to the worker pipeline.
//!
//! The [`Queue`] trait models an SQS-FIFO-style queue: messages carry a
//! `group_key`, and within one group at most one message is in flight at a
//! time, delivered in arrival order. Ungrouped messages are independent.
//! Received messages stay invisible until acked, nacked, or their visibility
//! timeout lapses; exhausted messages are moved to a dead-letter buffer by
//! the consumer.

mod envelope;
mod memory;
mod queue;

pub use envelope::{MessageKind, QueueMessage};
pub use memory::{DeadLetteredMessage, MemoryQueue, MemoryQueueConfig};
pub use queue::{Queue, ReceiptHandle, ReceivedMessage};

use thiserror::Error;

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The receipt handle does not reference an in-flight message (already
    /// acked, or its visibility lapsed and it was redelivered).
    #[error("unknown receipt handle: {0}")]
    UnknownReceipt(String),

    /// The message payload could not be encoded/decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing transport failed.
    #[error("backend error: {0}")]
    Backend(String),
}
