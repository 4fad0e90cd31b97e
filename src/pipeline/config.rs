//! Pipeline configuration.
//!
//! Recognized options mirror the asynchronous-write surface of the engine:
//! parallelism, WAL engagement, flush policy, and batch boundaries.
//! Immutable after the pipeline starts.

use crate::replog::SyncMode;

use super::errors::{PipelineError, PipelineResult};

/// Asynchronous write pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of independent worker lanes, each with its own queue.
    pub parallel_level: usize,

    /// Bounded capacity of each lane's queue; a full lane blocks the
    /// enqueuing thread.
    pub queue_capacity: usize,

    /// Whether the local write-ahead path is engaged before a unit is
    /// acknowledged. When false the sink appends without waiting for
    /// durable flush.
    pub use_wal: bool,

    /// Flush policy applied by the sink on commit boundaries.
    pub tx_sync: SyncMode,

    /// Number of applied units before a forced commit boundary; 0 disables
    /// forced boundaries (the sink still settles once a lane drains).
    pub commit_every: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_level: 1,
            queue_capacity: 1024,
            use_wal: true,
            tx_sync: SyncMode::Full,
            commit_every: 0,
        }
    }
}

impl PipelineConfig {
    /// Flush mode the write path derives from this configuration: with the
    /// WAL disengaged nothing is synced before acknowledgment, otherwise
    /// the configured `tx_sync` policy applies.
    pub fn log_sync_mode(&self) -> SyncMode {
        if !self.use_wal {
            SyncMode::No
        } else {
            self.tx_sync
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.parallel_level == 0 {
            return Err(PipelineError::configuration(
                "parallel_level must be at least 1",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::configuration(
                "queue_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_disengaged_wal_skips_sync() {
        let config = PipelineConfig {
            use_wal: false,
            tx_sync: SyncMode::Full,
            ..PipelineConfig::default()
        };
        assert_eq!(config.log_sync_mode(), SyncMode::No);

        let config = PipelineConfig {
            use_wal: true,
            tx_sync: SyncMode::NoMetadata,
            ..PipelineConfig::default()
        };
        assert_eq!(config.log_sync_mode(), SyncMode::NoMetadata);
    }

    #[test]
    fn test_zero_parallel_level_rejected() {
        let config = PipelineConfig {
            parallel_level: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = PipelineConfig {
            queue_capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
