use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::ServerError;

/// Top-level server configuration, loaded from TOML with env overrides for
/// the secrets.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub gateways: GatewaySection,
    #[serde(default)]
    pub notifications: NotificationSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NotificationSection {
    /// Endpoint notifications POST to; none configured means notifications
    /// are rendered and dropped.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Listen address, e.g. `0.0.0.0:8080`.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_owned()
}

/// Which state backend the process runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// In-process; for development and tests.
    #[default]
    Memory,
    /// Redis; for multi-process deployments.
    Redis,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StateSection {
    #[serde(default)]
    pub backend: StateBackend,
    /// Redis URL, required when `backend = "redis"`.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Key prefix for the Redis backend.
    #[serde(default)]
    pub redis_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    /// Transient-failure ceiling before dead-lettering.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds between settlement polls.
    #[serde(default = "default_poll_delay_secs")]
    pub poll_delay_secs: u64,
    /// Seconds between approval escalation sweeps.
    #[serde(default = "default_tick_secs")]
    pub approval_tick_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_delay_secs: default_poll_delay_secs(),
            approval_tick_secs: default_tick_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_poll_delay_secs() -> u64 {
    60
}
fn default_tick_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    /// Override Stripe's API base URL (sandbox, tests).
    #[serde(default)]
    pub stripe_base_url: Option<String>,
    /// Override Checkout's API base URL.
    #[serde(default)]
    pub checkout_base_url: Option<String>,
    /// Override the internal transfer service base URL.
    #[serde(default)]
    pub ach_base_url: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// The worker tuning this config describes.
    #[must_use]
    pub fn worker_config(&self) -> refundry_worker::WorkerConfig {
        refundry_worker::WorkerConfig {
            max_attempts: self.worker.max_attempts,
            poll_delay: Duration::from_secs(self.worker.poll_delay_secs),
            approval_tick_interval: Duration::from_secs(self.worker.approval_tick_secs),
            ..refundry_worker::WorkerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.state.backend, StateBackend::Memory);
        assert_eq!(config.worker.max_attempts, 5);
    }

    #[test]
    fn parses_redis_section() {
        let config: Config = toml::from_str(
            r#"
            [state]
            backend = "redis"
            redis_url = "redis://cache:6379"
            redis_prefix = "refundry-prod"

            [worker]
            max_attempts = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.state.backend, StateBackend::Redis);
        assert_eq!(config.state.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.worker.max_attempts, 7);
        assert_eq!(
            config.worker_config().poll_delay,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Config, _> = toml::from_str("[server]\ntypo_field = 1\n");
        assert!(result.is_err());
    }
}
