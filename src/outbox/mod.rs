//! Outbox event record.
//!
//! An [`OutboxEvent`] is written by a producer in the same transaction as
//! the business change it describes, then picked up and dispatched by the
//! poller. Only the poller (through a repository) mutates it after that.

mod metadata;
mod record;

pub use metadata::EventMetadata;
pub use record::{OutboxEvent, OutboxStatus};

pub(crate) use record::aggregate_prefix;
