//! Outbox poller: fetch, dispatch, retry, dead-letter.

mod config;
mod error;
mod poller;
mod retry;
mod stats;

pub use config::PollerConfig;
pub use error::{ConfigError, PollerError};
pub use poller::{BatchReport, EventOutcome, OutboxPoller};
pub use retry::{RetryDecision, RetryPolicy};
pub use stats::{PollerStats, StatsSnapshot};
