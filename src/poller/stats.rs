use std::ops::Add;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Live counters owned by one poller.
///
/// Counters only grow, and each one moves only after the storage write it
/// describes has succeeded.
#[derive(Debug, Default)]
pub struct PollerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    dlq: AtomicU64,
    polling: AtomicBool,
}

impl PollerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dlq: self.dlq.load(Ordering::Relaxed),
            is_polling: self.polling.load(Ordering::Acquire),
        }
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_letter(&self) {
        self.dlq.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_polling(&self, polling: bool) {
        self.polling.store(polling, Ordering::Release);
    }
}

/// Point-in-time copy of [`PollerStats`].
///
/// Snapshots from several pollers can be summed for a host-wide view;
/// the sum reports polling if any of them is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Events dispatched and marked published.
    pub processed: u64,
    /// Failed attempts that were scheduled for retry.
    pub failed: u64,
    /// Events moved to the dead-letter store.
    pub dlq: u64,
    pub is_polling: bool,
}

impl Add for StatsSnapshot {
    type Output = StatsSnapshot;

    fn add(self, rhs: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed + rhs.processed,
            failed: self.failed + rhs.failed,
            dlq: self.dlq + rhs.dlq,
            is_polling: self.is_polling || rhs.is_polling,
        }
    }
}

impl std::iter::Sum for StatsSnapshot {
    fn sum<I: Iterator<Item = StatsSnapshot>>(iter: I) -> Self {
        iter.fold(StatsSnapshot::default(), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_outcomes() {
        let stats = PollerStats::default();
        stats.record_processed();
        stats.record_processed();
        stats.record_failed();
        stats.record_dead_letter();
        stats.set_polling(true);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                processed: 2,
                failed: 1,
                dlq: 1,
                is_polling: true,
            }
        );
    }

    #[test]
    fn snapshots_sum_across_pollers() {
        let a = StatsSnapshot {
            processed: 3,
            failed: 1,
            dlq: 0,
            is_polling: false,
        };
        let b = StatsSnapshot {
            processed: 2,
            failed: 0,
            dlq: 1,
            is_polling: true,
        };
        let total: StatsSnapshot = [a, b].into_iter().sum();
        assert_eq!(total, a + b);
        assert_eq!(total.processed, 5);
        assert_eq!(total.dlq, 1);
        assert!(total.is_polling);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let json = serde_json::to_value(StatsSnapshot::default()).unwrap();
        assert_eq!(json["isPolling"], false);
        assert_eq!(json["dlq"], 0);
    }
}
