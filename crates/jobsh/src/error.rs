//! Error types for Jobsh
//!
//! This module provides error types for the shell and the job daemon with the
//! following design goals:
//! - Human-readable error messages for users
//! - Clear categorization for programmatic handling
//! - Stable error codes for IPC clients ([`DaemonError::code`], [`JobError::code`])

use crate::limits::LimitExceeded;
use thiserror::Error;

/// Result type alias using Jobsh's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Jobsh error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Parse error occurred while parsing a command line (without location info).
    #[error("parse error: {0}")]
    Parse(String),

    /// Parse error with source location information.
    #[error("parse error at line {line}, column {column}: {message}")]
    ParseAt {
        message: String,
        line: usize,
        column: usize,
    },

    /// Malformed glob or parameter expression that cannot fall back to a literal.
    #[error("expansion error: {0}")]
    Expansion(String),

    /// Execution error occurred while running a command.
    #[error("execution error: {0}")]
    Execution(String),

    /// I/O error from filesystem or process operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Command not found.
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// Resource limit exceeded.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(#[from] LimitExceeded),

    /// Daemon or IPC failure.
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// Job table failure.
    #[error(transparent)]
    Job(#[from] JobError),

    /// Internal error for unexpected failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a parse error with source location.
    pub fn parse_at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::ParseAt {
            message: message.into(),
            line,
            column,
        }
    }

    /// Whether this error happened before anything was executed.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::ParseAt { .. })
    }
}

/// Failures talking to, or starting, the job daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Another daemon instance owns the socket / pid file.
    #[error("daemon already running (pid {pid})")]
    AlreadyRunning { pid: i32 },

    /// No daemon is listening on the control socket.
    #[error("daemon is not running at {0}")]
    NotRunning(String),

    /// No response arrived within the request timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Malformed request or response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error reported by the daemon for a request.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    /// Socket or state file I/O failure.
    #[error("daemon io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Stable error code for programmatic clients.
    pub fn code(&self) -> &str {
        match self {
            Self::AlreadyRunning { .. } => "DAEMON_ALREADY_RUNNING",
            Self::NotRunning(_) => "DAEMON_NOT_RUNNING",
            Self::Timeout(_) => "DAEMON_TIMEOUT",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Remote { code, .. } => code,
            Self::Io(_) => "DAEMON_IO",
        }
    }
}

/// Failures operating on a single job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already running: {0}")]
    AlreadyRunning(String),

    #[error("job not running: {0}")]
    NotRunning(String),

    #[error("invalid job: {0}")]
    Invalid(String),

    /// Mutating operation on a read-only manager.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
}

impl JobError {
    /// Stable error code for programmatic clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "JOB_NOT_FOUND",
            Self::AlreadyRunning(_) => "JOB_ALREADY_RUNNING",
            Self::NotRunning(_) => "JOB_NOT_RUNNING",
            Self::Invalid(_) => "JOB_INVALID",
            Self::NotSupported(_) => "NOT_SUPPORTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = Error::parse_at("unterminated quote", 2, 7);
        assert_eq!(
            err.to_string(),
            "parse error at line 2, column 7: unterminated quote"
        );
        assert!(err.is_parse_error());
        assert!(!Error::Execution("x".into()).is_parse_error());
    }

    #[test]
    fn test_job_error_codes_are_stable() {
        assert_eq!(JobError::NotFound("a".into()).code(), "JOB_NOT_FOUND");
        assert_eq!(JobError::NotRunning("a".into()).code(), "JOB_NOT_RUNNING");
        assert_eq!(DaemonError::Timeout(5).code(), "DAEMON_TIMEOUT");
        let remote = DaemonError::Remote {
            code: "JOB_NOT_FOUND".into(),
            message: "job not found: x".into(),
        };
        assert_eq!(remote.code(), "JOB_NOT_FOUND");
    }
}
