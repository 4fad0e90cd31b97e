//! Observability: structured logging and typed lifecycle events.
//!
//! Logs are synchronous JSON lines with deterministic key ordering.
//! Cluster lifecycle transitions are modeled as one closed event enum,
//! not an extensible listener interface.

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};
