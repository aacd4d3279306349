use std::fmt;
use std::future::Future;

use async_trait::async_trait;

use super::HandlerError;
use crate::outbox::OutboxEvent;

/// Side effect triggered by an outbox event.
///
/// Handlers run concurrently with every other handler matching the same
/// event and may be invoked more than once for it (delivery is
/// at-least-once), so they should be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError>;

    /// Name used in logs when the registration does not supply one.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Adapts an async closure into an [`EventHandler`].
///
/// The closure receives its own copy of the event so the returned future
/// can be `'static`.
pub struct FnHandler<F> {
    name: String,
    handler: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(OutboxEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        (self.handler)(event.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
