//! Error types for hvremote-exec

use std::time::Duration;

use thiserror::Error;

use crate::template::TemplateError;

/// Errors that can occur during remote execution
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Missing or invalid connection settings
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// SSH key could not be read or parsed
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Channel or session failure on an established connection
    #[error("channel error: {0}")]
    Channel(String),

    /// No pooled connection became free in time
    #[error("connection pool exhausted after waiting {timeout:?}")]
    PoolExhausted {
        /// How long the borrow waited
        timeout: Duration,
    },

    /// The pool was closed
    #[error("connection pool is closed")]
    PoolClosed,

    /// Script template could not be rendered
    #[error("failed to render script template: {0}")]
    Template(#[from] TemplateError),

    /// Script exited with a non-zero status
    #[error("command failed with exit code {exit_code}: {stderr}")]
    ScriptFailed {
        /// Exit status code
        exit_code: i32,
        /// Stdout output
        stdout: String,
        /// Stderr output
        stderr: String,
        /// Command text that was executed
        command: String,
    },

    /// Script stdout was not the expected JSON value
    #[error(
        "failed to unmarshal JSON result - exitStatus:{exit_code}\nstdOut:{stdout}\nstdErr:{stderr}\nerr:{error}\ncommand:{command}"
    )]
    ResultDecode {
        /// Exit status code
        exit_code: i32,
        /// Trimmed stdout output
        stdout: String,
        /// Stderr output
        stderr: String,
        /// Decoder message
        error: String,
        /// Command text that was executed
        command: String,
    },

    /// Existence probe printed something other than true/false
    #[error("unexpected output from `{command}`: {stdout}")]
    UnexpectedOutput {
        /// Probe command
        command: String,
        /// Trimmed stdout output
        stdout: String,
    },

    /// Every upload strategy failed
    #[error("all upload methods failed for {remote_path}: {}", .failures.join("; "))]
    Transfer {
        /// Destination path
        remote_path: String,
        /// One `strategy: reason` entry per attempt, in order
        failures: Vec<String>,
    },

    /// Directory walk or one of its uploads failed
    #[error("failed to upload directory {local_root}: {source}")]
    DirectoryUpload {
        /// Local directory being uploaded
        local_root: String,
        /// First failure encountered
        source: Box<ExecError>,
    },

    /// Operation exceeded its deadline
    #[error("operation timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Local I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl ExecError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::Timeout { .. }
                | ExecError::PoolExhausted { .. }
        )
    }

    /// Check if error came from the channel itself rather than the remote script
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::AuthenticationFailed(_)
                | ExecError::SshKeyError(_)
                | ExecError::Channel(_)
        )
    }

    /// Exit status reported by the remote side, if any
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::ScriptFailed { exit_code, .. } | ExecError::ResultDecode { exit_code, .. } => {
                Some(*exit_code)
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::IoError(err.to_string())
    }
}
