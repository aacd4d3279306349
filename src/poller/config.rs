use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Tuning for an [`OutboxPoller`](super::OutboxPoller).
///
/// Deserializes from camelCase keys; any key left out takes its default.
///
/// ```
/// use outbox_dispatch::PollerConfig;
///
/// let config: PollerConfig = serde_json::from_str(r#"{"batchSize": 25}"#).unwrap();
/// assert_eq!(config.batch_size, 25);
/// assert_eq!(config.max_retries, 3);
/// assert_eq!(config.retry_backoff_ms, vec![1000, 5000, 30000]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollerConfig {
    /// Pause between poll cycles.
    pub poll_interval_ms: u64,
    /// Maximum events fetched per cycle.
    pub batch_size: usize,
    /// How long a fetched event stays locked against other pollers. The
    /// storage adapter enforces it, see
    /// [`InMemoryOutboxRepository::with_lock_timeout`](crate::InMemoryOutboxRepository::with_lock_timeout).
    pub lock_timeout_ms: u64,
    /// Backoff before each retry; slot `k - 1` is used before attempt `k + 1`.
    pub retry_backoff_ms: Vec<u64>,
    /// Total dispatch attempts before an event is dead-lettered.
    pub max_retries: u32,
    /// Relative jitter applied to each backoff delay.
    pub jitter_factor: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            batch_size: 100,
            lock_timeout_ms: 30_000,
            retry_backoff_ms: vec![1_000, 5_000, 30_000],
            max_retries: 3,
            jitter_factor: 0.1,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = millis(timeout);
        self
    }

    pub fn with_retry_backoff<I>(mut self, backoff: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
    {
        self.retry_backoff_ms = backoff.into_iter().map(millis).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Vec<Duration> {
        self.retry_backoff_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.retry_backoff_ms.is_empty() {
            return Err(ConfigError::EmptyBackoff);
        }
        if let Some(index) = self.retry_backoff_ms.iter().position(|ms| *ms == 0) {
            return Err(ConfigError::ZeroBackoff { index });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroMaxRetries);
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor));
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
