//! Cluster lifecycle events.
//!
//! Every observable transition of the replication core is one variant of a
//! single closed enum. Consumers match on it; there is no listener
//! registration surface.

use super::logger::{Logger, Severity};

/// Observable events in the replication core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Server boot begins
    ServerStarting,
    /// Server is ready to serve
    ServerUp,
    /// Server has left the cluster (stop or demotion)
    ServerOffline,

    /// The configured leader changed (redirect followed)
    LeaderChanged,
    /// A replica completed its handshake and entered streaming
    ReplicaOnline,
    /// A replica disconnected or timed out
    ReplicaOffline,

    /// Hot resync started for a peer
    HotResyncStarted,
    /// Hot resync backlog fully streamed
    HotResyncComplete,
    /// Full resync (snapshot transfer) started for a peer
    FullResyncStarted,
    /// Full resync installed and streaming resumed
    FullResyncComplete,

    /// Replication log pruned below a retention floor
    LogPruned,
    /// Replication log reset to a full-resync checkpoint
    LogReset,

    /// A quorum wait expired before enough acknowledgments arrived
    QuorumTimeout,
    /// An asynchronous write unit failed; the lane continues
    PipelineUnitFailed,

    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,
}

impl Event {
    /// Returns the event name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ServerStarting => "SERVER_STARTING",
            Event::ServerUp => "SERVER_UP",
            Event::ServerOffline => "SERVER_OFFLINE",
            Event::LeaderChanged => "LEADER_CHANGED",
            Event::ReplicaOnline => "REPLICA_ONLINE",
            Event::ReplicaOffline => "REPLICA_OFFLINE",
            Event::HotResyncStarted => "HOT_RESYNC_STARTED",
            Event::HotResyncComplete => "HOT_RESYNC_COMPLETE",
            Event::FullResyncStarted => "FULL_RESYNC_STARTED",
            Event::FullResyncComplete => "FULL_RESYNC_COMPLETE",
            Event::LogPruned => "LOG_PRUNED",
            Event::LogReset => "LOG_RESET",
            Event::QuorumTimeout => "QUORUM_TIMEOUT",
            Event::PipelineUnitFailed => "PIPELINE_UNIT_FAILED",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",
        }
    }

    /// Default severity for this event.
    pub fn severity(&self) -> Severity {
        match self {
            Event::QuorumTimeout | Event::ReplicaOffline => Severity::Warn,
            Event::PipelineUnitFailed => Severity::Error,
            _ => Severity::Info,
        }
    }

    /// Emit this event through the structured logger.
    pub fn emit(&self, fields: &[(&str, &str)]) {
        Logger::log(self.severity(), self.as_str(), fields);
    }
}
