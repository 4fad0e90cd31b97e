//! Engine facade error types.

use thiserror::Error;

/// Errors surfaced by the storage facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Underlying filesystem failure
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Database name not present in the engine
    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    /// Snapshot archive does not match its declared checksum
    #[error(
        "snapshot integrity failure for {database}: stored {stored:#010x}, computed {computed:#010x}"
    )]
    SnapshotIntegrity {
        database: String,
        stored: u32,
        computed: u32,
    },

    /// Transaction payload could not be decoded
    #[error("malformed transaction payload: {0}")]
    MalformedPayload(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
