use std::time::Duration;

use refundry_core::MerchantId;

use crate::retry::RetryStrategy;

/// Tunables for the worker pipeline.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Long-poll wait per receive call.
    pub poll_wait: Duration,
    /// Maximum messages per receive call.
    pub batch_size: usize,
    /// Maximum handlers running concurrently within one worker.
    pub max_concurrent: usize,
    /// Transient-failure ceiling; past it the message dead-letters and the
    /// refund fails with an exhausted-retry cause.
    pub max_attempts: u32,
    /// Backoff between transient-failure redeliveries.
    pub retry: RetryStrategy,
    /// Delay before the first settlement poll after a gateway accepts.
    pub poll_delay: Duration,
    /// Ceiling on settlement re-polls; past it polling stops and the
    /// terminal webhook closes the refund.
    pub max_poll_attempts: u32,
    /// Lease on per-refund locks taken by handlers.
    pub lock_ttl: Duration,
    /// How long a handler waits for a contended refund lock before handing
    /// the message back.
    pub lock_timeout: Duration,
    /// How long webhook event ids are remembered for replay protection.
    pub webhook_replay_ttl: Duration,
    /// Scope under which per-gateway webhook secrets live in the credential
    /// store.
    pub webhook_merchant: MerchantId,
    /// Cadence of the approval escalation sweep.
    pub approval_tick_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_secs(10),
            batch_size: 10,
            max_concurrent: 8,
            max_attempts: 5,
            retry: RetryStrategy::default(),
            poll_delay: Duration::from_secs(60),
            max_poll_attempts: 48,
            lock_ttl: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
            webhook_replay_ttl: Duration::from_secs(7 * 24 * 3600),
            webhook_merchant: MerchantId::from("platform"),
            approval_tick_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.poll_wait, Duration::from_secs(10));
        assert_eq!(cfg.webhook_merchant.as_str(), "platform");
    }
}
