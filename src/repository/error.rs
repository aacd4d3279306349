use thiserror::Error;

/// Storage-side failure from an [`OutboxRepository`](super::OutboxRepository).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("repository lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("outbox event not found: {0}")]
    NotFound(String),
    #[error("outbox event already exists: {0}")]
    Duplicate(String),
    #[error("storage timeout: {0}")]
    Timeout(String),
    #[error("storage connection failed: {0}")]
    Connection(String),
    #[error("storage error: {0}")]
    Other(String),
}

impl RepositoryError {
    /// Whether the same call may succeed on a later poll cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::Timeout(_) | RepositoryError::Connection(_)
        )
    }
}
