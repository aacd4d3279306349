//! Event dispatcher.
//!
//! Maps event types to handlers through three kinds of pattern:
//!
//! ```text
//! "lead.created"  exact       only lead.created
//! "lead.*"        aggregate   any type whose first segment is `lead`
//! "*"             global      every event
//! ```
//!
//! All handlers matching an event run concurrently. Dispatch fails if any
//! of them failed, but only after every one has finished.

mod dispatcher;
mod error;
mod handler;
mod pattern;

pub use dispatcher::{DispatchReport, EventDispatcher};
pub use error::{DispatchError, HandlerError};
pub use handler::{EventHandler, FnHandler};
pub use pattern::EventPattern;
