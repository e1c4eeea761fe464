//! Notification rendering and delivery.
//!
//! Lifecycle events render through per-event minijinja templates and fan out
//! to every configured channel. Delivery is best-effort: a failing channel
//! is logged and does not fail the pipeline.

mod channel;
mod dispatcher;
mod event;
mod template;

pub use channel::{MemoryChannel, NotificationChannel, WebhookChannel};
pub use dispatcher::NotificationDispatcher;
pub use event::NotificationEvent;
pub use template::{RenderedNotification, TemplateEngine};

use thiserror::Error;

/// Errors from notification rendering and delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Template rendering failed.
    #[error("template error: {0}")]
    Template(String),

    /// A channel failed to deliver.
    #[error("delivery failed via {channel}: {reason}")]
    Delivery { channel: String, reason: String },

    /// The event could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}
