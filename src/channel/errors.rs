//! Channel error types.
//!
//! Any failure leaves the channel broken; the caller must close it and
//! re-establish the connection.

use std::fmt;
use std::io;

/// Channel error type
#[derive(Debug)]
pub struct ChannelError {
    /// Error kind
    pub kind: ChannelErrorKind,
    /// Error message
    pub message: String,
    /// Underlying IO error if applicable
    source: Option<io::Error>,
}

/// Channel error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    /// Underlying stream I/O failure
    Io,

    /// Stream ended mid-frame
    UnexpectedEof,

    /// Channel was poisoned by a previous failure
    Broken,

    /// Length-prefixed field exceeds the frame limit
    FrameTooLarge,

    /// Varint did not terminate within its maximum width
    VarintOverflow,

    /// String bytes were not valid UTF-8
    InvalidUtf8,

    /// Peer speaks a protocol version this node does not understand
    VersionMismatch,
}

impl ChannelError {
    /// Create a new channel error.
    pub fn new(kind: ChannelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create an I/O error, classifying unexpected EOF separately.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        let kind = if source.kind() == io::ErrorKind::UnexpectedEof {
            ChannelErrorKind::UnexpectedEof
        } else {
            ChannelErrorKind::Io
        };
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a broken-channel error.
    pub fn broken() -> Self {
        Self::new(
            ChannelErrorKind::Broken,
            "channel is broken by a previous failure and must be closed",
        )
    }

    /// Create a frame-too-large error.
    pub fn frame_too_large(length: u64, limit: u64) -> Self {
        Self::new(
            ChannelErrorKind::FrameTooLarge,
            format!("frame length {} exceeds limit {}", length, limit),
        )
    }

    /// Create a varint overflow error.
    pub fn varint_overflow() -> Self {
        Self::new(
            ChannelErrorKind::VarintOverflow,
            "varint exceeds maximum encoded width",
        )
    }

    /// Create an invalid UTF-8 error.
    pub fn invalid_utf8(message: impl Into<String>) -> Self {
        Self::new(ChannelErrorKind::InvalidUtf8, message)
    }

    /// Create a protocol version mismatch error.
    pub fn version_mismatch(expected: u16, actual: u16) -> Self {
        Self::new(
            ChannelErrorKind::VersionMismatch,
            format!(
                "protocol version mismatch: expected {}, peer sent {}",
                expected, actual
            ),
        )
    }

    /// True when the peer spoke an unsupported protocol version.
    pub fn is_version_mismatch(&self) -> bool {
        self.kind == ChannelErrorKind::VersionMismatch
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;
