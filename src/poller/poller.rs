use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{PollerConfig, PollerError, PollerStats, RetryDecision, RetryPolicy, StatsSnapshot};
use crate::dispatcher::{DispatchError, EventDispatcher};
use crate::outbox::OutboxEvent;
use crate::repository::{OutboxRepository, RepositoryError};
use crate::time::{Clock, SystemClock};

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Events whose outcome could not be written back; they stay pending.
    pub storage_errors: usize,
}

/// What happened to a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Published,
    Retried {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    DeadLettered {
        retry_count: u32,
    },
    /// Dispatch ran but recording the result failed.
    StorageFailed,
}

struct Running {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background worker that drains the outbox through an [`EventDispatcher`].
///
/// Each cycle fetches up to `batch_size` due events and processes them one
/// at a time: dispatch, then record the outcome as published, scheduled for
/// retry or dead-lettered. Cycles never overlap. Between cycles the loop
/// sleeps for `poll_interval`.
///
/// ```no_run
/// use std::sync::Arc;
/// use outbox_dispatch::{
///     EventDispatcher, HandlerError, InMemoryOutboxRepository, OutboxEvent, OutboxPoller,
///     PollerConfig,
/// };
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mut dispatcher = EventDispatcher::new();
/// dispatcher.register_fn("lead.created", "welcome-email", |_: OutboxEvent| async {
///     Ok::<(), HandlerError>(())
/// })?;
///
/// let repo = Arc::new(InMemoryOutboxRepository::new());
/// let poller = OutboxPoller::new(repo, Arc::new(dispatcher), PollerConfig::default())?;
/// poller.start()?;
/// // ...
/// let stats = poller.stop().await;
/// println!("published {} events", stats.processed);
/// # Ok(())
/// # }
/// ```
pub struct OutboxPoller<R> {
    core: Core<R>,
    running: Mutex<Option<Running>>,
}

impl<R> OutboxPoller<R>
where
    R: OutboxRepository + 'static,
{
    /// Fails with [`PollerError::InvalidConfig`] if `config` does not
    /// validate, so neither the loop nor a manual cycle can run with it.
    pub fn new(
        repository: Arc<R>,
        dispatcher: Arc<EventDispatcher>,
        config: PollerConfig,
    ) -> Result<Self, PollerError> {
        config.validate()?;
        let policy = RetryPolicy::from_config(&config);
        Ok(Self {
            core: Core {
                repository,
                dispatcher,
                config: Arc::new(config),
                policy: Arc::new(policy),
                clock: Arc::new(SystemClock),
                stats: Arc::new(PollerStats::default()),
                cycle: Arc::new(AsyncMutex::new(())),
            },
            running: Mutex::new(None),
        })
    }

    /// Clock used to stamp `next_retry_at`. Set it before calling
    /// [`start`](Self::start).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.core.clock = clock;
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.core.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.core.policy
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.core.repository
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.core.dispatcher
    }

    /// Spawn the polling loop on the current tokio runtime.
    pub fn start(&self) -> Result<(), PollerError> {
        let runtime = Handle::try_current().map_err(|_| PollerError::NoRuntime)?;

        let mut running = self.running.lock().map_err(|_| PollerError::LockPoisoned)?;
        if running.is_some() {
            return Err(PollerError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        self.core.stats.set_polling(true);
        let handle = runtime.spawn(self.core.clone().run(stop_rx));
        *running = Some(Running { stop_tx, handle });

        info!(
            poll_interval_ms = self.core.config.poll_interval_ms,
            batch_size = self.core.config.batch_size,
            max_retries = self.core.config.max_retries,
            "outbox poller started"
        );
        Ok(())
    }

    /// Signal the loop to stop and wait for the batch in flight to finish.
    /// Returns the final counters. Does nothing beyond that if the poller
    /// is not running.
    pub async fn stop(&self) -> StatsSnapshot {
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(Running { stop_tx, handle }) = running {
            // The loop also exits if the receiver is gone, so a failed send is fine.
            let _ = stop_tx.send(true);
            if let Err(err) = handle.await {
                error!(error = %err, "outbox poller task ended abnormally");
            }
            info!("outbox poller stopped");
        }

        self.core.stats.set_polling(false);
        self.core.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Run one poll cycle now.
    ///
    /// Waits for any cycle already in progress, including one started by
    /// the background loop. Returns the fetch error if the batch could not
    /// be loaded.
    pub async fn poll_once(&self) -> Result<BatchReport, RepositoryError> {
        self.core.poll_once().await
    }

    /// Dispatch a single event and record its outcome. This does not take
    /// the cycle lock.
    pub async fn process_event(&self, event: &OutboxEvent) -> EventOutcome {
        self.core.process_event(event).await
    }
}

/// State shared between the poller handle and its loop task.
struct Core<R> {
    repository: Arc<R>,
    dispatcher: Arc<EventDispatcher>,
    config: Arc<PollerConfig>,
    policy: Arc<RetryPolicy>,
    clock: Arc<dyn Clock>,
    stats: Arc<PollerStats>,
    cycle: Arc<AsyncMutex<()>>,
}

impl<R> Clone for Core<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            dispatcher: Arc::clone(&self.dispatcher),
            config: Arc::clone(&self.config),
            policy: Arc::clone(&self.policy),
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
            cycle: Arc::clone(&self.cycle),
        }
    }
}

impl<R> Core<R>
where
    R: OutboxRepository + 'static,
{
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let interval = self.config.poll_interval();
        loop {
            let stopped = *stop_rx.borrow();
            if stopped {
                break;
            }

            // Fetch failures are logged inside the cycle; the next tick retries.
            let _ = self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.stats.set_polling(false);
    }

    async fn poll_once(&self) -> Result<BatchReport, RepositoryError> {
        let _cycle = self.cycle.lock().await;

        let events = match self
            .repository
            .fetch_pending_events(self.config.batch_size)
            .await
        {
            Ok(events) => events,
            Err(err) => {
                error!(error = %err, "failed to fetch pending outbox events");
                return Err(err);
            }
        };

        let mut report = BatchReport {
            fetched: events.len(),
            ..BatchReport::default()
        };
        if events.is_empty() {
            return Ok(report);
        }
        debug!(count = events.len(), "processing outbox batch");

        for event in &events {
            match self.process_event(event).await {
                EventOutcome::Published => report.published += 1,
                EventOutcome::Retried { .. } => report.retried += 1,
                EventOutcome::DeadLettered { .. } => report.dead_lettered += 1,
                EventOutcome::StorageFailed => report.storage_errors += 1,
            }
        }

        debug!(
            fetched = report.fetched,
            published = report.published,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            storage_errors = report.storage_errors,
            "outbox batch complete"
        );
        Ok(report)
    }

    async fn process_event(&self, event: &OutboxEvent) -> EventOutcome {
        match self.dispatcher.dispatch(event).await {
            Ok(report) => match self.repository.mark_as_published(&event.id).await {
                Ok(()) => {
                    self.stats.record_processed();
                    debug!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        handlers = report.invoked.len(),
                        "outbox event published"
                    );
                    EventOutcome::Published
                }
                Err(err) => {
                    error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %err,
                        "failed to mark outbox event as published"
                    );
                    EventOutcome::StorageFailed
                }
            },
            Err(err) => self.handle_failure(event, &failure_reason(&err)).await,
        }
    }

    async fn handle_failure(&self, event: &OutboxEvent, reason: &str) -> EventOutcome {
        match self.policy.decide(event.retry_count) {
            RetryDecision::Retry { retry_count, delay } => {
                let next_retry_at = self
                    .clock
                    .now()
                    .checked_add_signed(TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);

                match self
                    .repository
                    .schedule_retry(&event.id, retry_count, next_retry_at, reason)
                    .await
                {
                    Ok(()) => {
                        self.stats.record_failed();
                        warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            retry_count,
                            max_retries = self.policy.max_retries,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = reason,
                            "outbox event scheduled for retry"
                        );
                        EventOutcome::Retried {
                            retry_count,
                            next_retry_at,
                        }
                    }
                    Err(err) => {
                        error!(
                            event_id = %event.id,
                            retry_count,
                            error = %err,
                            "failed to schedule outbox retry"
                        );
                        EventOutcome::StorageFailed
                    }
                }
            }
            RetryDecision::DeadLetter { retry_count } => {
                match self
                    .repository
                    .move_to_dead_letter(&event.id, retry_count, reason)
                    .await
                {
                    Ok(()) => {
                        self.stats.record_dead_letter();
                        error!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            aggregate_id = %event.aggregate_id,
                            retry_count,
                            error = reason,
                            "outbox event moved to dead letter queue"
                        );
                        EventOutcome::DeadLettered { retry_count }
                    }
                    Err(err) => {
                        error!(
                            event_id = %event.id,
                            retry_count,
                            error = %err,
                            "failed to dead-letter outbox event"
                        );
                        EventOutcome::StorageFailed
                    }
                }
            }
        }
    }
}

/// Message stored as `last_error`: the handler's own failure text.
fn failure_reason(err: &DispatchError) -> String {
    match err {
        DispatchError::Handler { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}
