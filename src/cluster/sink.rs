//! Bridge from the asynchronous write pipeline into the leader's
//! replication path.
//!
//! Pipeline workers run on plain threads; each applied unit blocks its
//! lane on the async append/replicate round trip, which keeps per-lane
//! FIFO intact while lanes proceed independently.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::pipeline::{PipelineError, PipelineResult, WriteSink, WriteUnit};

use super::quorum::DurabilityLevel;
use super::server::HaServer;

/// Write sink that feeds committed units into `append_and_replicate`.
pub struct ReplicationSink {
    server: Arc<HaServer>,
    durability: DurabilityLevel,
    runtime: Handle,
}

impl ReplicationSink {
    /// Capture the current runtime; must be called from within it. Worker
    /// threads later block on that runtime per unit.
    pub fn new(server: Arc<HaServer>, durability: DurabilityLevel) -> Self {
        Self {
            server,
            durability,
            runtime: Handle::current(),
        }
    }
}

impl WriteSink for ReplicationSink {
    fn apply(&self, unit: &WriteUnit) -> PipelineResult<()> {
        self.runtime
            .block_on(
                self.server
                    .append_and_replicate(&unit.payload, self.durability),
            )
            .map(|_| ())
            .map_err(|e| PipelineError::unit_failed(e.to_string()))
    }
}
