use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, error, warn};

use super::handler::{EventHandler, FnHandler};
use super::pattern::EventPattern;
use super::{DispatchError, HandlerError};
use crate::outbox::OutboxEvent;

/// A handler bound to a pattern.
struct Registration {
    /// Pattern string exactly as registered; `unregister` matches on it.
    raw: String,
    pattern: EventPattern,
    name: String,
    handler: Arc<dyn EventHandler>,
}

/// Outcome of a dispatch where every matching handler succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Names of the handlers invoked, in resolution order.
    pub invoked: Vec<String>,
}

impl DispatchReport {
    /// No handler matched the event.
    pub fn is_unhandled(&self) -> bool {
        self.invoked.is_empty()
    }
}

/// Routes outbox events to registered handlers.
///
/// Register every handler before the poller starts; the registry is not
/// meant to change while events are being dispatched.
///
/// ```
/// use outbox_dispatch::{EventDispatcher, HandlerError, OutboxEvent};
///
/// let mut dispatcher = EventDispatcher::new();
/// dispatcher
///     .register_fn("lead.*", "crm-sync", |event: OutboxEvent| async move {
///         let _ = event.aggregate_id;
///         Ok::<(), HandlerError>(())
///     })
///     .unwrap();
///
/// assert_eq!(dispatcher.handlers_for("lead.created"), vec!["crm-sync"]);
/// ```
#[derive(Default)]
pub struct EventDispatcher {
    registrations: Vec<Registration>,
    handler_timeout: Option<Duration>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any handler invocation that runs longer than `timeout`.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout
    }

    /// Register a handler under its own [`EventHandler::name`].
    pub fn register<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, DispatchError>
    where
        H: EventHandler + 'static,
    {
        self.register_shared(pattern, None, Arc::new(handler))
    }

    pub fn register_named<H>(
        &mut self,
        pattern: &str,
        name: &str,
        handler: H,
    ) -> Result<&mut Self, DispatchError>
    where
        H: EventHandler + 'static,
    {
        self.register_shared(pattern, Some(name), Arc::new(handler))
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(
        &mut self,
        pattern: &str,
        name: &str,
        handler: F,
    ) -> Result<&mut Self, DispatchError>
    where
        F: Fn(OutboxEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_shared(pattern, None, Arc::new(FnHandler::new(name, handler)))
    }

    /// Register a handler instance that is shared with other registrations.
    pub fn register_shared(
        &mut self,
        pattern: &str,
        name: Option<&str>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<&mut Self, DispatchError> {
        let parsed = EventPattern::parse(pattern)?;
        let name = name.map_or_else(|| handler.name().to_string(), str::to_string);
        debug!(pattern, handler = %name, "registered outbox handler");
        self.registrations.push(Registration {
            raw: pattern.to_string(),
            pattern: parsed,
            name,
            handler,
        });
        Ok(self)
    }

    /// Remove every handler registered under exactly this pattern string.
    /// Returns how many were removed.
    pub fn unregister(&mut self, pattern: &str) -> usize {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.raw != pattern);
        before - self.registrations.len()
    }

    pub fn handler_count(&self) -> usize {
        self.registrations.len()
    }

    /// Distinct registered patterns, in first-registration order.
    pub fn patterns(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for registration in &self.registrations {
            if !seen.contains(&registration.raw.as_str()) {
                seen.push(&registration.raw);
            }
        }
        seen
    }

    /// Names of the handlers an event of this type would reach, in
    /// dispatch order.
    pub fn handlers_for(&self, event_type: &str) -> Vec<&str> {
        self.resolve(event_type)
            .into_iter()
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Run every matching handler concurrently and wait for all of them.
    ///
    /// Fails if any handler failed, reporting the first failure in
    /// resolution order. Siblings of a failing handler are never cancelled.
    /// An event nobody subscribes to dispatches successfully. Dropping the
    /// returned future aborts the handler tasks it started.
    pub async fn dispatch(&self, event: &OutboxEvent) -> Result<DispatchReport, DispatchError> {
        let matched = self.resolve(&event.event_type);
        if matched.is_empty() {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                "no handlers registered for outbox event"
            );
            return Ok(DispatchReport::default());
        }

        let shared = Arc::new(event.clone());
        let tasks: Vec<JoinHandle<Result<(), HandlerError>>> = matched
            .iter()
            .map(|registration| {
                let handler = Arc::clone(&registration.handler);
                let event = Arc::clone(&shared);
                let timeout = self.handler_timeout;
                tokio::spawn(async move {
                    match timeout {
                        Some(after) => tokio::time::timeout(after, handler.handle(&event))
                            .await
                            .unwrap_or(Err(HandlerError::Timeout { after })),
                        None => handler.handle(&event).await,
                    }
                })
            })
            .collect();
        let _abort = AbortOnDrop(tasks.iter().map(JoinHandle::abort_handle).collect());
        let results = join_all(tasks).await;

        let mut failed = 0;
        let mut first_failure: Option<(String, HandlerError)> = None;
        for (registration, joined) in matched.iter().zip(results) {
            match joined.unwrap_or_else(|err| Err(join_failure(err))) {
                Ok(()) => debug!(
                    handler = %registration.name,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "outbox handler succeeded"
                ),
                Err(err) => {
                    error!(
                        handler = %registration.name,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %err,
                        "outbox handler failed"
                    );
                    failed += 1;
                    if first_failure.is_none() {
                        first_failure = Some((registration.name.clone(), err));
                    }
                }
            }
        }

        match first_failure {
            Some((handler, source)) => Err(DispatchError::Handler {
                handler,
                event_id: event.id.clone(),
                failed,
                source,
            }),
            None => Ok(DispatchReport {
                invoked: matched.iter().map(|r| r.name.clone()).collect(),
            }),
        }
    }

    /// Exact matches first, then aggregate wildcards, then global, each in
    /// registration order.
    fn resolve(&self, event_type: &str) -> Vec<&Registration> {
        let mut matched: Vec<&Registration> = self
            .registrations
            .iter()
            .filter(|r| r.pattern.matches(event_type))
            .collect();
        matched.sort_by_key(|r| r.pattern.class());
        matched
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers: Vec<(&str, &str)> = self
            .registrations
            .iter()
            .map(|r| (r.raw.as_str(), r.name.as_str()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("handlers", &handlers)
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

/// Aborts the spawned handlers if `dispatch` is dropped before they join.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn join_failure(err: JoinError) -> HandlerError {
    if !err.is_panic() {
        return HandlerError::failed("handler task was cancelled");
    }
    let panic = err.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    HandlerError::Panicked(message)
}
