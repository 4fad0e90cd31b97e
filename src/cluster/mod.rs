//! Cluster role protocol: leader/replica state machine, peer connections,
//! connect handshake (hot vs. full resync), streaming replication, and
//! quorum tracking.
//!
//! - Exactly one node, the configured leader, assigns replication message
//!   numbers and accepts writes.
//! - Replicas consume the stream strictly in order; a gap is fatal for the
//!   connection and forces a resync.
//! - Role transitions are serialized through a single guarded state path.
//! - Requests addressed to a non-leader fail with a redirect carrying the
//!   actual leader's address; callers retry transparently.

mod config;
mod errors;
mod peer;
mod quorum;
mod replica;
mod role;
mod server;
mod sink;

pub use config::ClusterConfig;
pub use errors::{ClusterError, ClusterErrorKind, ClusterResult};
pub use peer::{ConnectionState, Peer};
pub use quorum::{DurabilityLevel, QuorumTracker};
pub use role::{RoleState, ServerRole};
pub use server::HaServer;
pub use sink::ReplicationSink;
