//! Cluster error types.
//!
//! Taxonomy:
//! - Protocol violations (malformed frame, out-of-order message, version
//!   mismatch) tear the connection down; the peer reconnects and resyncs.
//! - Redirects (`NotTheLeader`) are retryable against the carried leader
//!   address, not terminal failures.
//! - Durability failures demote the leader role; the leader never
//!   acknowledges a transaction it cannot guarantee.
//! - Quorum timeouts surface to the caller; leader-local durability is
//!   unaffected.

use std::fmt;

use crate::channel::ChannelError;
use crate::engine::EngineError;
use crate::protocol::ProtocolError;
use crate::replog::LogError;
use crate::transport::TransportError;

/// Cluster error type
#[derive(Debug)]
pub struct ClusterError {
    /// Error kind
    pub kind: ClusterErrorKind,
    /// Error message
    pub message: String,
    /// Actual leader address, present on redirect errors
    pub leader_url: Option<String>,
}

/// Cluster error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterErrorKind {
    /// Operation addressed to a node that is not the leader
    NotTheLeader,

    /// Insufficient replica acknowledgments within the deadline
    QuorumTimeout,

    /// Illegal role transition attempted
    IllegalTransition,

    /// Peer broke the wire protocol (malformed frame, gap, wrong command)
    ProtocolViolation,

    /// Peer speaks an unsupported protocol version
    VersionMismatch,

    /// Invalid cluster configuration
    ConfigurationError,

    /// Connection to a peer failed or was lost
    ConnectionFailed,

    /// Leader role was demoted after a durability failure
    Demoted,

    /// Replication log failure
    Log,

    /// Storage engine failure
    Storage,
}

impl ClusterError {
    /// Create a new cluster error.
    pub fn new(kind: ClusterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            leader_url: None,
        }
    }

    /// Create a leader redirect error.
    ///
    /// An empty `leader_url` means the addressed node does not know the
    /// leader either; callers must treat that as non-retryable.
    pub fn not_the_leader(leader_url: impl Into<String>) -> Self {
        let leader_url = leader_url.into();
        Self {
            kind: ClusterErrorKind::NotTheLeader,
            message: "this server is not the leader".to_string(),
            leader_url: if leader_url.is_empty() {
                None
            } else {
                Some(leader_url)
            },
        }
    }

    /// Create a quorum timeout error.
    pub fn quorum_timeout(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::QuorumTimeout, message)
    }

    /// Create an illegal transition error.
    pub fn illegal_transition(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::IllegalTransition, message)
    }

    /// Create a protocol violation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::ProtocolViolation, message)
    }

    /// Create a configuration error.
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::ConfigurationError, message)
    }

    /// Create a connection failure error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::ConnectionFailed, message)
    }

    /// Create a demotion error.
    pub fn demoted(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::Demoted, message)
    }

    /// True for redirect errors carrying a usable leader address.
    pub fn is_redirect(&self) -> bool {
        self.kind == ClusterErrorKind::NotTheLeader && self.leader_url.is_some()
    }

    /// True for errors the caller may retry (after redirecting or
    /// reconnecting).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ClusterErrorKind::NotTheLeader
                | ClusterErrorKind::QuorumTimeout
                | ClusterErrorKind::ConnectionFailed
        )
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterError({:?}): {}", self.kind, self.message)?;
        if let Some(ref url) = self.leader_url {
            write!(f, " (leader: {})", url)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClusterError {}

impl From<LogError> for ClusterError {
    fn from(e: LogError) -> Self {
        Self::new(ClusterErrorKind::Log, e.to_string())
    }
}

impl From<EngineError> for ClusterError {
    fn from(e: EngineError) -> Self {
        Self::new(ClusterErrorKind::Storage, e.to_string())
    }
}

impl From<ProtocolError> for ClusterError {
    fn from(e: ProtocolError) -> Self {
        if e.is_version_mismatch() {
            Self::new(ClusterErrorKind::VersionMismatch, e.to_string())
        } else {
            Self::new(ClusterErrorKind::ProtocolViolation, e.to_string())
        }
    }
}

impl From<ChannelError> for ClusterError {
    fn from(e: ChannelError) -> Self {
        if e.is_version_mismatch() {
            Self::new(ClusterErrorKind::VersionMismatch, e.to_string())
        } else {
            Self::new(ClusterErrorKind::ConnectionFailed, e.to_string())
        }
    }
}

impl From<TransportError> for ClusterError {
    fn from(e: TransportError) -> Self {
        Self::new(ClusterErrorKind::ConnectionFailed, e.to_string())
    }
}

/// Result type for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;
