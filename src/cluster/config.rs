//! Cluster configuration.
//!
//! Configured externally (file, env, CLI) and immutable after startup.
//! Authority is assigned, never inferred: the role in this struct decides
//! whether the node boots as leader or replica. Timeouts and retention are
//! configuration, never hard-coded at call sites.

use std::path::PathBuf;
use std::time::Duration;

use crate::replog::SyncMode;

use super::errors::{ClusterError, ClusterResult};
use super::quorum::DurabilityLevel;
use super::role::ServerRole;

/// Cluster server configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Cluster-unique server name
    pub server_name: String,

    /// Root data directory (replication log, databases)
    pub data_dir: PathBuf,

    /// Bind address for the peer protocol listener
    pub listen_address: String,

    /// Advertised admin/HTTP address
    pub http_address: String,

    /// Configured role at startup
    pub role: ServerRole,

    /// Leader peer address; required for replicas, forbidden for leaders
    pub leader_address: Option<String>,

    /// Flush policy of the replication log append path
    pub log_sync: SyncMode,

    /// Minimum trailing messages retained for hot resync; 0 keeps
    /// everything
    pub retain_min_messages: u64,

    /// Durability level applied when the caller does not choose one
    pub default_durability: DurabilityLevel,

    /// Deadline for quorum acknowledgment waits
    pub quorum_timeout: Duration,

    /// Interval between heartbeats on idle peer connections
    pub heartbeat_interval: Duration,

    /// Successive missed heartbeats before a peer is declared gone
    pub heartbeat_misses: u32,

    /// Delay before a replica retries a failed leader connection
    pub reconnect_delay: Duration,

    /// Bound on transparent leader redirects for one operation
    pub redirect_retry_limit: u32,
}

impl ClusterConfig {
    /// Leader configuration with defaults.
    pub fn leader(
        server_name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        listen_address: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            data_dir: data_dir.into(),
            listen_address: listen_address.into(),
            http_address: String::new(),
            role: ServerRole::Leader,
            leader_address: None,
            log_sync: SyncMode::Full,
            retain_min_messages: 0,
            default_durability: DurabilityLevel::LeaderOnly,
            quorum_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_misses: 3,
            reconnect_delay: Duration::from_secs(1),
            redirect_retry_limit: 3,
        }
    }

    /// Replica configuration with defaults.
    pub fn replica(
        server_name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        listen_address: impl Into<String>,
        leader_address: impl Into<String>,
    ) -> Self {
        let mut config = Self::leader(server_name, data_dir, listen_address);
        config.role = ServerRole::Replica;
        config.leader_address = Some(leader_address.into());
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ClusterResult<()> {
        if self.server_name.is_empty() {
            return Err(ClusterError::configuration_error(
                "server_name must not be empty",
            ));
        }
        match self.role {
            ServerRole::Leader => {
                if self.leader_address.is_some() {
                    return Err(ClusterError::configuration_error(
                        "a leader must not have leader_address configured",
                    ));
                }
            }
            ServerRole::Replica => {
                if self.leader_address.is_none() {
                    return Err(ClusterError::configuration_error(
                        "a replica requires leader_address",
                    ));
                }
            }
            ServerRole::Offline => {
                return Err(ClusterError::configuration_error(
                    "role must be LEADER or REPLICA at startup",
                ));
            }
        }
        if self.heartbeat_misses == 0 {
            return Err(ClusterError::configuration_error(
                "heartbeat_misses must be at least 1",
            ));
        }
        Ok(())
    }

    /// Heartbeat window after which a silent peer is declared gone.
    pub fn heartbeat_window(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_config_valid() {
        let config = ClusterConfig::leader("node-1", "/tmp/strata", "0.0.0.0:2424");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replica_config_valid() {
        let config =
            ClusterConfig::replica("node-2", "/tmp/strata", "0.0.0.0:2425", "node-1:2424");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replica_requires_leader_address() {
        let mut config = ClusterConfig::leader("node-2", "/tmp/strata", "0.0.0.0:2425");
        config.role = ServerRole::Replica;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_leader_forbids_leader_address() {
        let mut config = ClusterConfig::leader("node-1", "/tmp/strata", "0.0.0.0:2424");
        config.leader_address = Some("other:2424".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offline_role_rejected() {
        let mut config = ClusterConfig::leader("node-1", "/tmp/strata", "0.0.0.0:2424");
        config.role = ServerRole::Offline;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_server_name_rejected() {
        let config = ClusterConfig::leader("", "/tmp/strata", "0.0.0.0:2424");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_window() {
        let config = ClusterConfig::leader("node-1", "/tmp/strata", "0.0.0.0:2424");
        assert_eq!(
            config.heartbeat_window(),
            config.heartbeat_interval * config.heartbeat_misses
        );
    }
}
