use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a single handler invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("handler timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(#[source] Box<dyn StdError + Send + Sync>),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn other(err: impl StdError + Send + Sync + 'static) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

/// Failure from registering or dispatching.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid handler pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// At least one handler failed. Carries the first failure in
    /// resolution order.
    #[error("handler `{handler}` failed for event {event_id}: {source}")]
    Handler {
        handler: String,
        event_id: String,
        /// Number of handlers that failed for this event.
        failed: usize,
        #[source]
        source: HandlerError,
    },
}
