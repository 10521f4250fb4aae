use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLib, ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use serde::{Deserialize, Serialize};

use crate::queue::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct CourierConfig {
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Broker URL. Unset means the in-process fallback queue is used.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    /// Concurrent deliveries for the durable backend.
    pub concurrency: usize,
    /// Idle poll interval of durable workers.
    pub poll_interval_ms: u64,
    /// Timer interval of the fallback queue.
    pub fallback_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// A durable job claimed longer ago than this is handed to another worker.
    /// Must outlive the HTTP timeout.
    pub lease_timeout_ms: u64,
    pub completed_retention: usize,
    pub failed_retention: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// sqlx SQLite URL. Unset means an in-memory ledger.
    pub database_url: Option<String>,
}

impl CourierConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    /// Load with explicit overrides instead of the process environment.
    pub fn load_with_sources(
        overrides: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        if let Some(vars) = overrides {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // COURIER_QUEUE__REDIS_URL, COURIER_RETRY__MAX_ATTEMPTS, ...
            builder = builder.add_source(
                Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the queues cannot run with.
    fn validate(&self) -> Result<(), ConfigError> {
        let queue = &self.queue;
        let checks = [
            (queue.concurrency >= 1, "queue.concurrency must be at least 1"),
            (queue.poll_interval_ms > 0, "queue.poll_interval_ms must be non-zero"),
            (queue.fallback_interval_ms > 0, "queue.fallback_interval_ms must be non-zero"),
            (queue.probe_timeout_ms > 0, "queue.probe_timeout_ms must be non-zero"),
            (
                u128::from(queue.lease_timeout_ms) > self.http.timeout().as_millis(),
                "queue.lease_timeout_ms must exceed http.timeout_secs",
            ),
            (self.retry.max_attempts >= 1, "retry.max_attempts must be at least 1"),
            (
                self.retry.multiplier.is_finite() && self.retry.multiplier > 1.0,
                "retry.multiplier must be a finite number above 1.0",
            ),
            (self.http.timeout_secs > 0, "http.timeout_secs must be non-zero"),
        ];

        match checks.into_iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(ConfigError::Message(message.to_string())),
            None => Ok(()),
        }
    }

    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("queue.key_prefix", "courier:webhooks")?
            .set_default("queue.concurrency", 3)?
            .set_default("queue.poll_interval_ms", 500)?
            .set_default("queue.fallback_interval_ms", 2000)?
            .set_default("queue.probe_timeout_ms", 2000)?
            .set_default("queue.lease_timeout_ms", 60_000)?
            .set_default("queue.completed_retention", 100)?
            .set_default("queue.failed_retention", 500)?
            .set_default("retry.max_attempts", 5)?
            .set_default("retry.base_delay_ms", 2000)?
            .set_default("retry.multiplier", 2.0)?
            .set_default("http.timeout_secs", 30)?
            .set_default("http.user_agent", "courier-webhooks/0.1")
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fallback_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    /// Broker URL if one is actually configured.
    pub fn broker_url(&self) -> Option<&str> {
        self.redis_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_match_delivery_policy() {
        let config = CourierConfig::load_with_sources(Some(HashMap::new())).unwrap();

        assert!(config.queue.redis_url.is_none());
        assert_eq!(config.queue.concurrency, 3);
        assert_eq!(config.queue.fallback_interval(), Duration::from_secs(2));
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert!(config.ledger.database_url.is_none());

        let policy = config.retry.policy();
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn overrides_apply() {
        let mut vars = HashMap::new();
        vars.insert("queue.redis_url".to_string(), "redis://cache:6379".to_string());
        vars.insert("retry.max_attempts".to_string(), "3".to_string());
        vars.insert("http.timeout_secs".to_string(), "5".to_string());

        let config = CourierConfig::load_with_sources(Some(vars)).unwrap();

        assert_eq!(config.queue.broker_url(), Some("redis://cache:6379"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.http.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn blank_broker_url_means_no_broker() {
        let mut vars = HashMap::new();
        vars.insert("queue.redis_url".to_string(), " ".to_string());
        let config = CourierConfig::load_with_sources(Some(vars)).unwrap();
        assert_eq!(config.queue.broker_url(), None);
    }

    #[rstest]
    #[case::zero_fallback_interval("queue.fallback_interval_ms", "0")]
    #[case::zero_poll_interval("queue.poll_interval_ms", "0")]
    #[case::zero_probe_timeout("queue.probe_timeout_ms", "0")]
    #[case::no_workers("queue.concurrency", "0")]
    #[case::lease_shorter_than_http("queue.lease_timeout_ms", "30000")]
    #[case::no_attempts("retry.max_attempts", "0")]
    #[case::flat_backoff("retry.multiplier", "1.0")]
    #[case::shrinking_backoff("retry.multiplier", "0.5")]
    #[case::infinite_backoff("retry.multiplier", "inf")]
    #[case::zero_http_timeout("http.timeout_secs", "0")]
    fn unusable_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        let vars = HashMap::from([(key.to_string(), value.to_string())]);
        let err = CourierConfig::load_with_sources(Some(vars)).unwrap_err();
        let field = key.split('.').nth(1).unwrap();
        assert!(err.to_string().contains(field), "{key}: {err}");
    }

    #[test]
    fn single_attempt_without_retries_is_allowed() {
        let vars = HashMap::from([("retry.max_attempts".to_string(), "1".to_string())]);
        let config = CourierConfig::load_with_sources(Some(vars)).unwrap();
        assert_eq!(config.retry.policy().max_attempts, 1);
    }
}
