//! Handlers that record what they saw.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use outbox_dispatch::{EventHandler, HandlerError, OutboxEvent};

/// Shared log of `(handler, event type, event id)` calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, handler: &str, event: &OutboxEvent) {
        self.calls.lock().unwrap().push((
            handler.to_string(),
            event.event_type.clone(),
            event.id.clone(),
        ));
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Event types seen by one handler, in call order.
    pub fn seen_by(&self, handler: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _, _)| name == handler)
            .map(|(_, event_type, _)| event_type.clone())
            .collect()
    }

    /// Handlers that received a given event id, sorted.
    pub fn handlers_for_event(&self, event_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, id)| id == event_id)
            .map(|(name, _, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn count_for_event(&self, event_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, id)| id == event_id)
            .count()
    }
}

/// Succeeds and records the call.
#[derive(Debug)]
pub struct Recorder {
    name: String,
    log: CallLog,
}

impl Recorder {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        self.log.push(&self.name, event);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Records the call, then fails with a fixed message.
#[derive(Debug)]
pub struct AlwaysFails {
    name: String,
    message: String,
    log: CallLog,
}

impl AlwaysFails {
    pub fn new(name: &str, message: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl EventHandler for AlwaysFails {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        self.log.push(&self.name, event);
        Err(HandlerError::failed(self.message.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Fails the first `failures` calls, then succeeds.
#[derive(Debug)]
pub struct FailsThenSucceeds {
    remaining: AtomicUsize,
    log: CallLog,
}

impl FailsThenSucceeds {
    pub fn new(failures: usize, log: &CallLog) -> Self {
        Self {
            remaining: AtomicUsize::new(failures),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl EventHandler for FailsThenSucceeds {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        self.log.push("flaky", event);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HandlerError::failed("transient failure"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
