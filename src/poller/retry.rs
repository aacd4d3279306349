//! Retry, backoff and dead-letter decisions.

use std::time::Duration;

use rand::Rng;

use super::PollerConfig;

/// What to do with an event whose dispatch just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the event pending and try again after `delay`.
    Retry { retry_count: u32, delay: Duration },
    /// Attempts are exhausted; quarantine the event.
    DeadLetter { retry_count: u32 },
}

impl RetryDecision {
    pub fn retry_count(&self) -> u32 {
        match self {
            RetryDecision::Retry { retry_count, .. } | RetryDecision::DeadLetter { retry_count } => {
                *retry_count
            }
        }
    }

    pub fn is_dead_letter(&self) -> bool {
        matches!(self, RetryDecision::DeadLetter { .. })
    }
}

/// Attempt budget plus backoff table with symmetric jitter.
///
/// `max_retries` counts dispatch attempts, so with the default of 3 an event
/// is tried three times and dead-lettered on the third failure.
///
/// ```
/// use std::time::Duration;
/// use outbox_dispatch::{RetryDecision, RetryPolicy};
///
/// let policy = RetryPolicy::default();
/// assert_eq!(
///     policy.decide_with(0, 0.0),
///     RetryDecision::Retry { retry_count: 1, delay: Duration::from_secs(1) }
/// );
/// assert_eq!(policy.decide(2), RetryDecision::DeadLetter { retry_count: 3 });
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PollerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
            jitter_factor: config.jitter_factor,
        }
    }

    /// Decide after a failed attempt, given the retry count stored on the
    /// event before that attempt.
    pub fn decide(&self, previous_retries: u32) -> RetryDecision {
        let unit = if self.jitter_factor > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.decide_with(previous_retries, unit)
    }

    /// Deterministic core of [`decide`](Self::decide). `unit` in `[-1, 1]`
    /// picks where in the jitter window the delay lands.
    pub fn decide_with(&self, previous_retries: u32, unit: f64) -> RetryDecision {
        let attempts = previous_retries.saturating_add(1);
        if attempts >= self.max_retries {
            return RetryDecision::DeadLetter {
                retry_count: attempts,
            };
        }
        RetryDecision::Retry {
            retry_count: attempts,
            delay: self.jittered(attempts, unit),
        }
    }

    /// Backoff table entry used after the given (1-based) failed attempt.
    /// Attempts past the end of the table reuse its last entry.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) - 1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }

    /// Inclusive range a jittered delay for this attempt falls in.
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let base = self.base_delay(attempt).as_secs_f64();
        let spread = base * self.jitter_factor;
        (
            Duration::from_secs_f64((base - spread).max(0.0)),
            Duration::from_secs_f64(base + spread),
        )
    }

    fn jittered(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt);
        let unit = if unit.is_finite() {
            unit.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let base_ms = base.as_secs_f64() * 1_000.0;
        let jitter_ms = base_ms * self.jitter_factor * unit;
        let (low, high) = self.delay_bounds(attempt);
        let delay = Duration::from_millis((base_ms + jitter_ms).round().max(0.0) as u64);
        delay.clamp(low, high)
    }
}
