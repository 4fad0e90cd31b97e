//! Replication log: durable append-only store of numbered replication
//! messages.
//!
//! - Message numbers are strictly increasing and gapless within a leader
//!   epoch; readers never observe number N before N-1 is durable.
//! - Once appended and flushed, a message's bytes and number never change.
//! - Truncation only occurs on full-resync reset, which moves the
//!   checkpoint and restarts the retained sequence.
//! - Reads for resync run concurrently with ongoing appends; the log is
//!   append-only so readers never see a partial entry.

mod errors;
mod log;
mod reader;
mod record;

pub use errors::{LogError, LogErrorCode, LogResult, Severity};
pub use log::{ReplicationLog, SyncMode};
pub use reader::LogReader;
pub use record::LogRecord;
