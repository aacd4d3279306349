//! Repository wrappers that observe or break the in-memory store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_dispatch::{InMemoryOutboxRepository, OutboxEvent, OutboxRepository, RepositoryError};

/// Records every fetch and the mutations that follow it.
#[derive(Debug)]
pub struct CountingRepository {
    inner: InMemoryOutboxRepository,
    fetch_sizes: Mutex<Vec<usize>>,
    mutations: AtomicUsize,
}

impl CountingRepository {
    pub fn new(inner: InMemoryOutboxRepository) -> Self {
        Self {
            inner,
            fetch_sizes: Mutex::new(Vec::new()),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Number of events returned by each fetch, in call order.
    pub fn fetch_sizes(&self) -> Vec<usize> {
        self.fetch_sizes.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_sizes.lock().unwrap().len()
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboxRepository for CountingRepository {
    async fn fetch_pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let events = self.inner.fetch_pending_events(limit).await?;
        self.fetch_sizes.lock().unwrap().push(events.len());
        Ok(events)
    }

    async fn mark_as_published(&self, event_id: &str) -> Result<(), RepositoryError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_as_published(event_id).await
    }

    async fn schedule_retry(
        &self,
        event_id: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), RepositoryError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner
            .schedule_retry(event_id, retry_count, next_retry_at, error)
            .await
    }

    async fn move_to_dead_letter(
        &self,
        event_id: &str,
        retry_count: u32,
        error: &str,
    ) -> Result<(), RepositoryError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner
            .move_to_dead_letter(event_id, retry_count, error)
            .await
    }

    async fn get_event_by_id(&self, event_id: &str) -> Result<Option<OutboxEvent>, RepositoryError> {
        self.inner.get_event_by_id(event_id).await
    }
}

/// Fails fetches or writes on demand.
#[derive(Debug)]
pub struct FlakyRepository {
    inner: InMemoryOutboxRepository,
    failing_fetches: AtomicUsize,
    fail_writes: AtomicBool,
    fetch_calls: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(inner: InMemoryOutboxRepository) -> Self {
        Self {
            inner,
            failing_fetches: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` fetches fail with a connection error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection("write refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for FlakyRepository {
    async fn fetch_pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>, RepositoryError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepositoryError::Connection("database unavailable".into()));
        }
        self.inner.fetch_pending_events(limit).await
    }

    async fn mark_as_published(&self, event_id: &str) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.inner.mark_as_published(event_id).await
    }

    async fn schedule_retry(
        &self,
        event_id: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.inner
            .schedule_retry(event_id, retry_count, next_retry_at, error)
            .await
    }

    async fn move_to_dead_letter(
        &self,
        event_id: &str,
        retry_count: u32,
        error: &str,
    ) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.inner
            .move_to_dead_letter(event_id, retry_count, error)
            .await
    }

    async fn get_event_by_id(&self, event_id: &str) -> Result<Option<OutboxEvent>, RepositoryError> {
        self.inner.get_event_by_id(event_id).await
    }
}
