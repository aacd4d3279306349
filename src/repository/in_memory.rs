//! In-memory outbox store for tests and single-process hosts.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::{OutboxRepository, RepositoryError};
use crate::outbox::{OutboxEvent, OutboxStatus};
use crate::time::{Clock, SystemClock};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Store {
    next_seq: u64,
    /// Rows a fetch may still return, keyed by insertion sequence.
    active: BTreeMap<u64, OutboxEvent>,
    /// Event id -> sequence, for rows in `active`.
    index: HashMap<String, u64>,
    published: HashMap<String, OutboxEvent>,
    dead_letters: HashMap<String, OutboxEvent>,
    /// Fetch leases: event id -> locked until.
    leases: HashMap<String, DateTime<Utc>>,
}

impl Store {
    fn contains(&self, event_id: &str) -> bool {
        self.index.contains_key(event_id)
            || self.published.contains_key(event_id)
            || self.dead_letters.contains_key(event_id)
    }

    fn get(&self, event_id: &str) -> Option<&OutboxEvent> {
        self.index
            .get(event_id)
            .and_then(|seq| self.active.get(seq))
            .or_else(|| self.published.get(event_id))
            .or_else(|| self.dead_letters.get(event_id))
    }

    fn active_mut(&mut self, event_id: &str) -> Option<&mut OutboxEvent> {
        let seq = self.index.get(event_id)?;
        self.active.get_mut(seq)
    }

    fn take_active(&mut self, event_id: &str) -> Option<OutboxEvent> {
        let seq = self.index.remove(event_id)?;
        self.active.remove(&seq)
    }

    fn push(&mut self, event: OutboxEvent) {
        match event.status {
            OutboxStatus::Published => {
                self.published.insert(event.id.clone(), event);
            }
            OutboxStatus::DeadLetter => {
                self.dead_letters.insert(event.id.clone(), event);
            }
            OutboxStatus::Pending | OutboxStatus::Failed => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.index.insert(event.id.clone(), seq);
                self.active.insert(seq, event);
            }
        }
    }

    /// Apply a write to an unresolved row. Resolved rows are left alone and
    /// unknown ids are an error.
    fn update<F>(&mut self, event_id: &str, apply: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut Self),
    {
        if !self.contains(event_id) {
            return Err(RepositoryError::NotFound(event_id.to_string()));
        }
        if self.index.contains_key(event_id) {
            apply(self);
        }
        self.leases.remove(event_id);
        Ok(())
    }
}

/// Reference [`OutboxRepository`] backed by process memory.
///
/// Cloning yields another handle to the same store, so a producer, one or
/// more pollers and a test can all share it.
///
/// Fetching leases each returned event for the lock timeout. A second
/// poller on the same store skips leased events until the lease runs out
/// or the event is resolved, which mirrors `FOR UPDATE SKIP LOCKED` on a
/// relational backend. Published and dead-lettered rows move out of the
/// fetch scan, so its cost tracks the unresolved backlog only.
///
/// ```
/// use outbox_dispatch::{InMemoryOutboxRepository, OutboxEvent};
///
/// let repo = InMemoryOutboxRepository::new();
/// repo.insert(OutboxEvent::new("lead.created", "lead", "lead-1", Default::default()))
///     .unwrap();
/// assert_eq!(repo.pending_count().unwrap(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryOutboxRepository {
    store: Arc<RwLock<Store>>,
    clock: Arc<dyn Clock>,
    lock_timeout: TimeDelta,
}

impl Default for InMemoryOutboxRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            clock: Arc::new(SystemClock),
            lock_timeout: to_delta(DEFAULT_LOCK_TIMEOUT),
        }
    }

    /// Use the given clock for due-ness and lease checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How long a fetched event stays invisible to other fetches.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = to_delta(timeout);
        self
    }

    /// Add an event on the producer side. Rows are filed by their status.
    pub fn insert(&self, event: OutboxEvent) -> Result<(), RepositoryError> {
        let mut store = self.write()?;
        if store.contains(&event.id) {
            return Err(RepositoryError::Duplicate(event.id));
        }
        store.push(event);
        Ok(())
    }

    /// Unresolved events in insertion order, including ones backing off.
    pub fn pending(&self) -> Result<Vec<OutboxEvent>, RepositoryError> {
        Ok(self.read()?.active.values().cloned().collect())
    }

    /// Events still waiting for dispatch, including ones backing off.
    pub fn pending_count(&self) -> Result<usize, RepositoryError> {
        Ok(self.read()?.active.values().filter(|e| e.is_pending()).count())
    }

    /// Published events, oldest first.
    pub fn published(&self) -> Result<Vec<OutboxEvent>, RepositoryError> {
        Ok(sorted(self.read()?.published.values()))
    }

    /// Quarantined events, oldest first.
    pub fn dead_letters(&self) -> Result<Vec<OutboxEvent>, RepositoryError> {
        Ok(sorted(self.read()?.dead_letters.values()))
    }

    /// Total events held, dead letters included.
    pub fn len(&self) -> Result<usize, RepositoryError> {
        let store = self.read()?;
        Ok(store.active.len() + store.published.len() + store.dead_letters.len())
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>, RepositoryError> {
        self.store
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("read"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>, RepositoryError> {
        self.store
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("write"))
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn fetch_pending_events(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let now = self.clock.now();
        let locked_until = now
            .checked_add_signed(self.lock_timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut guard = self.write()?;
        let store = &mut *guard;

        let fetched: Vec<OutboxEvent> = store
            .active
            .values()
            .filter(|event| event.is_due(now))
            .filter(|event| !store.leases.get(&event.id).is_some_and(|until| *until > now))
            .take(limit)
            .cloned()
            .collect();

        for event in &fetched {
            store.leases.insert(event.id.clone(), locked_until);
        }

        Ok(fetched)
    }

    async fn mark_as_published(&self, event_id: &str) -> Result<(), RepositoryError> {
        let now = self.clock.now();
        let mut store = self.write()?;
        store.update(event_id, |store| {
            if !store.active_mut(event_id).is_some_and(|e| e.is_pending()) {
                return;
            }
            if let Some(mut event) = store.take_active(event_id) {
                event.status = OutboxStatus::Published;
                event.published_at = Some(now);
                store.push(event);
            }
        })
    }

    async fn schedule_retry(
        &self,
        event_id: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let mut store = self.write()?;
        store.update(event_id, |store| {
            if let Some(event) = store.active_mut(event_id).filter(|e| e.is_pending()) {
                event.retry_count = retry_count;
                event.next_retry_at = Some(next_retry_at);
                event.last_error = Some(error.to_string());
            }
        })
    }

    async fn move_to_dead_letter(
        &self,
        event_id: &str,
        retry_count: u32,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let mut store = self.write()?;
        store.update(event_id, |store| {
            if let Some(mut event) = store.take_active(event_id) {
                event.status = OutboxStatus::DeadLetter;
                event.retry_count = retry_count;
                event.next_retry_at = None;
                event.last_error = Some(error.to_string());
                store.push(event);
            }
        })
    }

    async fn get_event_by_id(
        &self,
        event_id: &str,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        Ok(self.read()?.get(event_id).cloned())
    }
}

fn sorted<'a>(events: impl Iterator<Item = &'a OutboxEvent>) -> Vec<OutboxEvent> {
    let mut events: Vec<OutboxEvent> = events.cloned().collect();
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    events
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
