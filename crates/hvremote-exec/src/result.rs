//! Result types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Raw outcome of one remote command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Turn a non-zero exit into `ExecError::ScriptFailed`
    ///
    /// # Errors
    /// Returns `ExecError::ScriptFailed` carrying the output and `command`
    /// when the status is not 0
    pub fn check(self, command: &str) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::ScriptFailed {
                exit_code: self.status,
                stdout: self.stdout,
                stderr: self.stderr,
                command: command.to_string(),
            })
        }
    }
}

/// Outcome of a fire-and-forget script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit status code
    pub status: i32,
    /// stderr output
    pub stderr: String,
}

impl From<CommandResult> for ExitReport {
    fn from(result: CommandResult) -> Self {
        Self {
            status: result.status,
            stderr: result.stderr,
        }
    }
}
