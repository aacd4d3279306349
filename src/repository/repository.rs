use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::outbox::OutboxEvent;

/// Storage contract the poller drives.
///
/// Implementations own the durable outbox table. When more than one poller
/// runs against the same store, `fetch_pending_events` must lock the rows it
/// returns (e.g. `SELECT ... FOR UPDATE SKIP LOCKED`, held for the configured
/// lock timeout) so that no two pollers dispatch the same event at once.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Up to `limit` events with status `pending` whose `next_retry_at` is
    /// absent or elapsed, oldest first.
    async fn fetch_pending_events(&self, limit: usize)
        -> Result<Vec<OutboxEvent>, RepositoryError>;

    /// Set status `published` and stamp `published_at`. Idempotent.
    async fn mark_as_published(&self, event_id: &str) -> Result<(), RepositoryError>;

    /// Record a failed attempt. Status stays `pending`.
    async fn schedule_retry(
        &self,
        event_id: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), RepositoryError>;

    /// Set status `dead_letter` with the final attempt count and remove the
    /// event from the pending pool for good.
    async fn move_to_dead_letter(
        &self,
        event_id: &str,
        retry_count: u32,
        error: &str,
    ) -> Result<(), RepositoryError>;

    /// Point lookup across pending, published and dead-lettered events.
    async fn get_event_by_id(&self, event_id: &str)
        -> Result<Option<OutboxEvent>, RepositoryError>;
}
