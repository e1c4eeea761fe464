use std::sync::Arc;

use tracing::{instrument, warn};

use crate::channel::NotificationChannel;
use crate::event::NotificationEvent;
use crate::template::TemplateEngine;
use crate::NotifyError;

/// Renders events and fans them out to every configured channel.
pub struct NotificationDispatcher {
    engine: TemplateEngine,
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    /// Create a dispatcher with the built-in templates.
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Result<Self, NotifyError> {
        Ok(Self {
            engine: TemplateEngine::new()?,
            channels,
        })
    }

    /// Create a dispatcher with a custom template engine.
    pub fn with_engine(
        engine: TemplateEngine,
        channels: Vec<Arc<dyn NotificationChannel>>,
    ) -> Self {
        Self { engine, channels }
    }

    /// Render and deliver an event to all channels.
    ///
    /// Rendering failures abort (nothing sensible to send); delivery
    /// failures are logged per channel and do not fail the dispatch —
    /// notifications are best-effort by contract.
    #[instrument(skip_all, fields(event = event.kind(), refund_id = %event.refund_id()))]
    pub async fn dispatch(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let rendered = self.engine.render(event)?;

        for channel in &self.channels {
            if let Err(e) = channel.deliver(&rendered, event).await {
                warn!(channel = channel.name(), error = %e, "notification delivery failed");
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use async_trait::async_trait;
    use refundry_core::{MerchantId, RefundId};

    struct FailingChannel;

    #[async_trait]
    impl NotificationChannel for FailingChannel {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(
            &self,
            _rendered: &crate::template::RenderedNotification,
            _event: &NotificationEvent,
        ) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery {
                channel: "failing".into(),
                reason: "always down".into(),
            })
        }
    }

    fn event() -> NotificationEvent {
        NotificationEvent::RefundCompleted {
            refund_id: RefundId::from("rfd_1"),
            merchant_id: MerchantId::from("m-1"),
            amount_minor: 2500,
            currency: "USD".into(),
        }
    }

    #[tokio::test]
    async fn dispatches_to_all_channels() {
        let memory = Arc::new(MemoryChannel::new());
        let dispatcher = NotificationDispatcher::new(vec![
            Arc::clone(&memory) as Arc<dyn NotificationChannel>,
        ])
        .unwrap();

        dispatcher.dispatch(&event()).await.unwrap();
        assert_eq!(memory.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_others() {
        let memory = Arc::new(MemoryChannel::new());
        let dispatcher = NotificationDispatcher::new(vec![
            Arc::new(FailingChannel) as Arc<dyn NotificationChannel>,
            Arc::clone(&memory) as Arc<dyn NotificationChannel>,
        ])
        .unwrap();

        dispatcher.dispatch(&event()).await.unwrap();
        assert_eq!(memory.deliveries().len(), 1);
    }
}
