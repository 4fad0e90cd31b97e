//! Peer connection state.
//!
//! One `Peer` represents another cluster member. The leader owns a set of
//! them, one per connected replica; a replica owns a single peer for its
//! leader. Created on accepted/initiated connect, destroyed on
//! disconnect.

use super::errors::{ClusterError, ClusterResult};
use super::role::ServerRole;

/// Per-connection lifecycle.
///
/// `DISCONNECTED -> HANDSHAKING -> (HOT_RESYNCING | FULL_RESYNCING)
///  -> STREAMING -> DISCONNECTED`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection
    Disconnected,
    /// Connect request received, resync decision pending
    Handshaking,
    /// Replaying retained log records from an offset
    HotResyncing,
    /// Transferring full database snapshots
    FullResyncing,
    /// Live replication stream
    Streaming,
}

impl ConnectionState {
    /// Returns the state name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Handshaking => "HANDSHAKING",
            ConnectionState::HotResyncing => "HOT_RESYNCING",
            ConnectionState::FullResyncing => "FULL_RESYNCING",
            ConnectionState::Streaming => "STREAMING",
        }
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            // Any live state may drop the connection.
            (_, Disconnected) => true,
            (Disconnected, Handshaking) => true,
            (Handshaking, HotResyncing) => true,
            (Handshaking, FullResyncing) => true,
            (HotResyncing, Streaming) => true,
            (FullResyncing, Streaming) => true,
            _ => false,
        }
    }
}

/// One other cluster member as seen from this node.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Cluster-unique server name
    pub server_name: String,
    /// Role of the remote node
    pub role: ServerRole,
    /// Peer protocol address
    pub remote_address: String,
    /// Advertised admin/HTTP address
    pub remote_http_address: String,
    /// Highest message number the peer has acknowledged
    pub last_ack_message_number: u64,
    /// Connection lifecycle state
    pub connection_state: ConnectionState,
}

impl Peer {
    /// Create a peer in the DISCONNECTED state.
    pub fn new(
        server_name: impl Into<String>,
        role: ServerRole,
        remote_address: impl Into<String>,
        remote_http_address: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            role,
            remote_address: remote_address.into(),
            remote_http_address: remote_http_address.into(),
            last_ack_message_number: 0,
            connection_state: ConnectionState::Disconnected,
        }
    }

    /// Advance the connection state, rejecting illegal transitions.
    pub fn advance(&mut self, next: ConnectionState) -> ClusterResult<()> {
        if !self.connection_state.can_advance_to(next) {
            return Err(ClusterError::illegal_transition(format!(
                "peer {} cannot move from {} to {}",
                self.server_name,
                self.connection_state.as_str(),
                next.as_str()
            )));
        }
        self.connection_state = next;
        Ok(())
    }

    /// Record an acknowledgment. Acks must never move backwards; an ack
    /// for an already-acked number is an idempotent duplicate.
    pub fn record_ack(&mut self, message_number: u64) -> ClusterResult<()> {
        if message_number < self.last_ack_message_number {
            return Err(ClusterError::protocol_violation(format!(
                "peer {} acknowledged {} after already acknowledging {}",
                self.server_name, message_number, self.last_ack_message_number
            )));
        }
        self.last_ack_message_number = message_number;
        Ok(())
    }
}
