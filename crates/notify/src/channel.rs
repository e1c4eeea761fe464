use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::event::NotificationEvent;
use crate::template::RenderedNotification;
use crate::NotifyError;

/// A delivery channel for rendered notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Unique channel name for logging.
    fn name(&self) -> &str;

    /// Deliver one rendered notification.
    async fn deliver(
        &self,
        rendered: &RenderedNotification,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError>;
}

/// Delivers notifications as JSON POSTs to a configured endpoint.
pub struct WebhookChannel {
    channel_name: String,
    url: String,
    client: Client,
}

impl WebhookChannel {
    /// Create a channel posting to `url`.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self {
            channel_name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.channel_name
    }

    #[instrument(skip_all, fields(channel = %self.channel_name))]
    async fn deliver(
        &self,
        rendered: &RenderedNotification,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "subject": rendered.subject,
            "body": rendered.body,
            "event": event,
        });

        debug!(url = %self.url, "delivering notification");
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery {
                channel: self.channel_name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Delivery {
                channel: self.channel_name.clone(),
                reason: format!("HTTP {status}"),
            })
        }
    }
}

/// In-memory channel recording deliveries, for tests.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    deliveries: Mutex<Vec<(RenderedNotification, NotificationEvent)>>,
}

impl MemoryChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far.
    pub fn deliveries(&self) -> Vec<(RenderedNotification, NotificationEvent)> {
        self.deliveries
            .lock()
            .expect("channel mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(
        &self,
        rendered: &RenderedNotification,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        self.deliveries
            .lock()
            .expect("channel mutex poisoned")
            .push((rendered.clone(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refundry_core::{MerchantId, RefundId};

    #[tokio::test]
    async fn memory_channel_records() {
        let channel = MemoryChannel::new();
        let rendered = RenderedNotification {
            subject: "s".into(),
            body: "b".into(),
        };
        let event = NotificationEvent::RefundFailed {
            refund_id: RefundId::from("rfd_1"),
            merchant_id: MerchantId::from("m-1"),
            reason: "x".into(),
        };

        channel.deliver(&rendered, &event).await.unwrap();
        let deliveries = channel.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0.subject, "s");
    }
}
