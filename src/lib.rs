//! Transactional outbox event dispatch.
//!
//! Producers write [`OutboxEvent`]s next to their business data. An
//! [`OutboxPoller`] drains them through an [`OutboxRepository`], fans each
//! one out to the handlers an [`EventDispatcher`] routes it to, and records
//! the outcome: published, retried with backoff, or dead-lettered.
//!
//! Delivery is at-least-once. Handlers must tolerate seeing an event twice.

mod dispatcher;
mod outbox;
mod poller;
mod repository;
mod time;

pub use dispatcher::{
    DispatchError, DispatchReport, EventDispatcher, EventHandler, EventPattern, FnHandler,
    HandlerError,
};
pub use outbox::{EventMetadata, OutboxEvent, OutboxStatus};
pub use poller::{
    BatchReport, ConfigError, EventOutcome, OutboxPoller, PollerConfig, PollerError,
    PollerStats, RetryDecision, RetryPolicy, StatsSnapshot,
};
pub use repository::{InMemoryOutboxRepository, OutboxRepository, RepositoryError};
pub use time::{Clock, ManualClock, SystemClock};
