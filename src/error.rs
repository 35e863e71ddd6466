//! Connection error types.
//!
//! Every failure the adapter can report maps onto one of these variants, so
//! callers can decide policy (report, skip host, abort) from the kind alone.
//! A non-zero exit code from `execute` is not an error and never shows up here.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while connecting to or operating on an instance.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Host identifier is malformed or uses an unsupported scheme
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// The runtime CLI binary could not be located
    #[error("Runtime CLI '{program}' not found: {reason}")]
    RuntimeNotFound { program: String, reason: String },

    /// The child process could not be spawned or did not exit cleanly
    #[error("Failed to execute {command}: {message}")]
    Execution { command: String, message: String },

    /// Source file for an upload is missing or unreadable
    #[error("Local file not found: {}: {source}", .path.display())]
    LocalFileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The copy command inside the instance exited non-zero
    #[error("Failed to transfer {from} to {to} (exit code {}):\n{stderr}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Transfer {
        from: String,
        to: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Operation exceeded the configured timeout; the child was terminated
    #[error("Operation timed out after {elapsed:?}: {operation}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// Operation attempted on a session that was already closed
    #[error("Connection to {target} is closed")]
    Closed { target: String },

    /// Transport name not present in the registry
    #[error("Unknown transport: {name}. Supported transports: {supported:?}")]
    UnknownTransport {
        name: String,
        supported: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Create an invalid target error
    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a runtime not found error
    pub fn runtime_not_found(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuntimeNotFound {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create an execution error
    pub fn execution(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a transfer error from the failed child's exit code and stderr
    pub fn transfer(
        from: impl Into<String>,
        to: impl Into<String>,
        exit_code: Option<i32>,
        stderr: &[u8],
    ) -> Self {
        Self::Transfer {
            from: from.into(),
            to: to.into(),
            exit_code,
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Whether the error was raised before any process was spawned.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget { .. }
                | Self::RuntimeNotFound { .. }
                | Self::Config(_)
                | Self::UnknownTransport { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
