//! Transport error types.

use std::io;

use thiserror::Error;

/// Errors raised while creating or accepting peer sockets.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket failure
    #[error("transport I/O failure: {0}")]
    Io(#[from] io::Error),

    /// TLS handshake or configuration failure
    #[error("TLS failure: {0}")]
    Tls(#[from] rustls::Error),

    /// Peer address could not be parsed or resolved
    #[error("invalid peer address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A connect or read deadline expired
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Invalid transport configuration
    #[error("transport configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Create an invalid-address error.
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
