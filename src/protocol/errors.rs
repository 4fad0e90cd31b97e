//! Protocol error types.
//!
//! A protocol error is terminal for the connection: the peer must
//! disconnect and renegotiate the handshake.

use thiserror::Error;

use crate::channel::ChannelError;

/// Errors raised while encoding or decoding peer frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying channel failure, including version mismatch
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Frame carried a command type id this node does not know
    #[error("unknown command type id {0}")]
    UnknownCommand(u8),

    /// Error frame carried an unknown error code
    #[error("unknown error code {0}")]
    UnknownErrorCode(u8),
}

impl ProtocolError {
    /// True when the peer spoke an unsupported protocol version.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, ProtocolError::Channel(e) if e.is_version_mismatch())
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
