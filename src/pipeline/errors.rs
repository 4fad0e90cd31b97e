//! Pipeline error types.
//!
//! Unit failures are isolated: they reach the registered callback and the
//! unit's completion, never the enqueuing thread.

use std::fmt;

/// Pipeline error type
#[derive(Debug, Clone)]
pub struct PipelineError {
    /// Error kind
    pub kind: PipelineErrorKind,
    /// Error message
    pub message: String,
}

/// Pipeline error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Pipeline is shutting down; no further units accepted
    Shutdown,

    /// Invalid pipeline configuration
    Configuration,

    /// The sink failed to apply one unit
    UnitFailed,
}

impl PipelineError {
    /// Create a new pipeline error.
    pub fn new(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a shutdown error.
    pub fn shutdown() -> Self {
        Self::new(
            PipelineErrorKind::Shutdown,
            "pipeline is shut down and no longer accepts units",
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Configuration, message)
    }

    /// Create a unit-failed error.
    pub fn unit_failed(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::UnitFailed, message)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipelineError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for PipelineError {}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
