//! Server role state machine.
//!
//! A node is LEADER (creates history), REPLICA (consumes history), or
//! OFFLINE. Authority is externally configured; there is no election. All
//! transitions flow through this machine so the rest of the core can never
//! observe a half-changed role.
//!
//! - A replica may re-point at a new leader (failover redirection); that
//!   updates its leader address, not its role.
//! - A leader that cannot guarantee durability demotes to OFFLINE rather
//!   than acknowledging writes it cannot keep.
//! - LEADER and REPLICA never convert into each other directly; the node
//!   goes through OFFLINE under explicit reconfiguration.

use super::errors::{ClusterError, ClusterResult};

/// Replication role of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    /// Sole write authority; assigns replication message numbers
    Leader,
    /// Applies the leader's stream; answers reads
    Replica,
    /// Not participating in replication
    Offline,
}

impl ServerRole {
    /// Returns the role name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRole::Leader => "LEADER",
            ServerRole::Replica => "REPLICA",
            ServerRole::Offline => "OFFLINE",
        }
    }
}

/// Role state with the data each role carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleState {
    /// Not participating in replication
    Offline,
    /// Sole write authority
    Leader,
    /// Following the leader at `leader_url`
    Replica {
        /// Peer address of the current leader
        leader_url: String,
    },
}

impl RoleState {
    /// Initial state.
    pub fn new() -> Self {
        Self::Offline
    }

    /// Transition to LEADER. Valid from OFFLINE; idempotent for a leader.
    pub fn become_leader(self) -> ClusterResult<Self> {
        match self {
            Self::Offline => Ok(Self::Leader),
            Self::Leader => Ok(Self::Leader),
            Self::Replica { .. } => Err(ClusterError::illegal_transition(
                "cannot promote a replica to leader without going offline first",
            )),
        }
    }

    /// Transition to REPLICA following `leader_url`. Valid from OFFLINE;
    /// for a replica this re-points at a new leader (failover
    /// redirection).
    pub fn become_replica(self, leader_url: impl Into<String>) -> ClusterResult<Self> {
        match self {
            Self::Offline | Self::Replica { .. } => Ok(Self::Replica {
                leader_url: leader_url.into(),
            }),
            Self::Leader => Err(ClusterError::illegal_transition(
                "cannot demote a leader to replica without going offline first",
            )),
        }
    }

    /// Leave the cluster. Valid from any state; used both for orderly stop
    /// and for leader demotion on durability failure.
    pub fn go_offline(self) -> Self {
        Self::Offline
    }

    /// The plain role of this state.
    pub fn role(&self) -> ServerRole {
        match self {
            Self::Offline => ServerRole::Offline,
            Self::Leader => ServerRole::Leader,
            Self::Replica { .. } => ServerRole::Replica,
        }
    }

    /// Whether this node may accept writes.
    pub fn can_accept_writes(&self) -> bool {
        matches!(self, Self::Leader)
    }

    /// Whether this node is the leader.
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader)
    }

    /// Whether this node is a replica.
    pub fn is_replica(&self) -> bool {
        matches!(self, Self::Replica { .. })
    }

    /// Current leader address, known only to replicas.
    pub fn leader_url(&self) -> Option<&str> {
        match self {
            Self::Replica { leader_url } => Some(leader_url),
            _ => None,
        }
    }
}

impl Default for RoleState {
    fn default() -> Self {
        Self::new()
    }
}
