mod error;
mod in_memory;
mod repository;

pub use error::RepositoryError;
pub use in_memory::InMemoryOutboxRepository;
pub use repository::OutboxRepository;
