use thiserror::Error;

/// A [`PollerConfig`](super::PollerConfig) value the poller cannot run with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("retry backoff table is empty")]
    EmptyBackoff,
    #[error("retry backoff entry {index} is zero")]
    ZeroBackoff { index: usize },
    #[error("max retries must be at least 1")]
    ZeroMaxRetries,
    #[error("jitter factor {0} is outside [0, 1)")]
    JitterOutOfRange(f64),
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("invalid poller config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("poller is already running")]
    AlreadyRunning,
    #[error("poller must be started from within a tokio runtime")]
    NoRuntime,
    #[error("poller state lock poisoned")]
    LockPoisoned,
}
