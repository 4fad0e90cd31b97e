//! Replication log error types.
//!
//! Error codes:
//! - REPL_LOG_APPEND_FAILED (ERROR severity)
//! - REPL_LOG_SYNC_FAILED (FATAL severity)
//! - REPL_LOG_CORRUPTION (FATAL severity)
//! - REPL_LOG_MESSAGE_NOT_FOUND (ERROR severity)
//! - REPL_LOG_CLOSED (ERROR severity)
//!
//! Any append-path failure on a leader forces role demotion upstream: the
//! leader must never acknowledge a transaction it cannot guarantee.

use std::fmt;
use std::io;

/// Severity levels for log errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, server continues
    Error,
    /// The process (or the leader role) must terminate
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Replication log error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorCode {
    /// Log write failed
    AppendFailed,
    /// Log sync-to-disk failed
    SyncFailed,
    /// Checksum failure, malformed record, or sequence violation
    Corruption,
    /// Requested message number is older than the oldest retained entry
    MessageNotFound,
    /// Operation attempted on a closed log
    Closed,
}

impl LogErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            LogErrorCode::AppendFailed => "REPL_LOG_APPEND_FAILED",
            LogErrorCode::SyncFailed => "REPL_LOG_SYNC_FAILED",
            LogErrorCode::Corruption => "REPL_LOG_CORRUPTION",
            LogErrorCode::MessageNotFound => "REPL_LOG_MESSAGE_NOT_FOUND",
            LogErrorCode::Closed => "REPL_LOG_CLOSED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            LogErrorCode::AppendFailed => Severity::Error,
            LogErrorCode::SyncFailed => Severity::Fatal,
            LogErrorCode::Corruption => Severity::Fatal,
            LogErrorCode::MessageNotFound => Severity::Error,
            LogErrorCode::Closed => Severity::Error,
        }
    }
}

impl fmt::Display for LogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Replication log error with full context
#[derive(Debug)]
pub struct LogError {
    code: LogErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl LogError {
    /// Create an append-failed error
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::AppendFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a sync-failed error
    pub fn sync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::SyncFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::Corruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create a corruption error with byte offset context
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::Corruption,
            message: reason.into(),
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    /// Create a corruption error with message number context
    pub fn corruption_at_message(message_number: u64, reason: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::Corruption,
            message: reason.into(),
            details: Some(format!("message_number: {}", message_number)),
            source: None,
        }
    }

    /// Create a message-not-found error
    pub fn message_not_found(requested: u64, first_retained: u64) -> Self {
        Self {
            code: LogErrorCode::MessageNotFound,
            message: format!(
                "message {} is older than the oldest retained entry",
                requested
            ),
            details: Some(format!("first_retained: {}", first_retained)),
            source: None,
        }
    }

    /// Create a closed-log error
    pub fn closed() -> Self {
        Self {
            code: LogErrorCode::Closed,
            message: "replication log is closed".to_string(),
            details: None,
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> LogErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error is fatal
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether this is a message-not-found error (the hot-resync
    /// fallback signal).
    pub fn is_message_not_found(&self) -> bool {
        self.code == LogErrorCode::MessageNotFound
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;
