//! Shared fixtures for the integration suites.

#![allow(dead_code)]

pub mod handlers;
pub mod repos;

use std::sync::Arc;

use outbox_dispatch::{
    EventDispatcher, InMemoryOutboxRepository, ManualClock, OutboxEvent, OutboxPoller,
    OutboxRepository, PollerConfig,
};
use serde_json::{json, Map, Value};

/// Route library logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be a JSON object, got {other}"),
    }
}

pub fn event(event_type: &str, aggregate_id: &str) -> OutboxEvent {
    let aggregate_type = event_type.split('.').next().unwrap_or(event_type);
    OutboxEvent::new(
        event_type,
        aggregate_type,
        aggregate_id,
        payload(json!({ "aggregateId": aggregate_id })),
    )
}

/// A store and a poller sharing one manual clock.
pub struct Harness<R> {
    pub store: InMemoryOutboxRepository,
    pub clock: ManualClock,
    pub poller: OutboxPoller<R>,
}

pub fn harness(dispatcher: EventDispatcher, config: PollerConfig) -> Harness<InMemoryOutboxRepository> {
    harness_with(dispatcher, config, |store| store)
}

/// Build a harness whose poller talks to `wrap(store)` instead of the
/// store itself.
pub fn harness_with<R, F>(dispatcher: EventDispatcher, config: PollerConfig, wrap: F) -> Harness<R>
where
    R: OutboxRepository + 'static,
    F: FnOnce(InMemoryOutboxRepository) -> R,
{
    init_tracing();
    let clock = ManualClock::new();
    let store = InMemoryOutboxRepository::new()
        .with_clock(Arc::new(clock.clone()))
        .with_lock_timeout(config.lock_timeout());
    let poller = OutboxPoller::new(Arc::new(wrap(store.clone())), Arc::new(dispatcher), config)
        .expect("harness config is valid")
        .with_clock(Arc::new(clock.clone()));
    Harness {
        store,
        clock,
        poller,
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
