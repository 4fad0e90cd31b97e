//! stratadb-repl: the replication core of the strata multi-model database
//! engine.
//!
//! Ships a durable, strictly-ordered stream of committed transaction units
//! from one leader to a set of replicas: append-only replication log,
//! leader/replica role protocol with hot and full resync, binary peer
//! protocol, quorum durability levels, and a backpressure-aware
//! asynchronous write pipeline.

pub mod api;
pub mod channel;
pub mod cli;
pub mod cluster;
pub mod engine;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod replog;
pub mod transport;
