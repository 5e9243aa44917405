//! Operations on one live connection
//!
//! Both transports end up here once they hold a connection: the ephemeral
//! transport with a freshly dialled one, the pooled transport with a
//! borrowed one. They differ only in how commands are rewritten.

use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::ExecError;
use crate::result::CommandResult;
use crate::shell;
use crate::traits::Connection;

/// How commands are rewritten before they are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStyle {
    /// Every command gets the prelude and escalation prefix
    Inline,
    /// Scripts go through the script host, helper commands are sent as is
    ScriptHost,
}

/// A connection bound to its config and command style
#[derive(Clone, Copy)]
pub struct RemoteSession<'a> {
    conn: &'a dyn Connection,
    config: &'a ConnectionConfig,
    style: CommandStyle,
}

impl std::fmt::Debug for RemoteSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("host", &self.config.host)
            .field("style", &self.style)
            .finish_non_exhaustive()
    }
}

impl<'a> RemoteSession<'a> {
    /// Bind a connection
    #[must_use]
    pub fn new(conn: &'a dyn Connection, config: &'a ConnectionConfig, style: CommandStyle) -> Self {
        Self {
            conn,
            config,
            style,
        }
    }

    /// Underlying connection
    #[must_use]
    pub fn connection(&self) -> &'a dyn Connection {
        self.conn
    }

    /// Config the connection was made with
    #[must_use]
    pub fn config(&self) -> &'a ConnectionConfig {
        self.config
    }

    fn prepare_script(&self, script: &str) -> String {
        match self.style {
            CommandStyle::Inline => shell::inline_command(self.config, script),
            CommandStyle::ScriptHost => shell::script_host_command(self.config, script),
        }
    }

    fn prepare_command(&self, command: &str) -> String {
        match self.style {
            CommandStyle::Inline => shell::inline_command(self.config, command),
            CommandStyle::ScriptHost => command.to_string(),
        }
    }

    /// Run a caller script, returning the raw outcome
    ///
    /// # Errors
    /// Returns a transport error; a non-zero exit is not an error here
    pub async fn run_script(&self, script: &str) -> Result<CommandResult, ExecError> {
        self.conn.exec(&self.prepare_script(script)).await
    }

    /// Run a helper command and require exit code 0
    ///
    /// # Errors
    /// Returns a transport error or `ExecError::ScriptFailed`
    pub async fn exec_checked(&self, command: &str) -> Result<CommandResult, ExecError> {
        let command = self.prepare_command(command);
        debug!(command = %command, "executing helper command");
        self.conn.exec(&command).await?.check(&command)
    }

    /// Run a helper command, ignoring any failure
    pub async fn exec_best_effort(&self, command: &str) {
        if let Err(e) = self.exec_checked(command).await {
            debug!(error = %e, "best-effort command failed");
        }
    }

    /// Create `dir` and its parents, ignoring any failure
    pub async fn mkdir_best_effort(&self, dir: &str) {
        self.exec_best_effort(&self.config.dialect.mkdir_command(dir))
            .await;
    }

    /// Whether a remote file exists
    ///
    /// # Errors
    /// Returns an error when the probe could not run or its output is
    /// neither true nor false; never `Ok(false)` in that case
    pub async fn file_exists(&self, path: &str) -> Result<bool, ExecError> {
        self.probe(&self.config.dialect.file_exists_command(path))
            .await
    }

    /// Whether a remote directory exists
    ///
    /// # Errors
    /// See [`RemoteSession::file_exists`]
    pub async fn directory_exists(&self, path: &str) -> Result<bool, ExecError> {
        self.probe(&self.config.dialect.directory_exists_command(path))
            .await
    }

    async fn probe(&self, command: &str) -> Result<bool, ExecError> {
        let result = self.exec_checked(command).await?;
        self.config
            .dialect
            .parse_probe(&result.stdout)
            .ok_or_else(|| ExecError::UnexpectedOutput {
                command: command.to_string(),
                stdout: result.stdout.trim().to_string(),
            })
    }

    /// Remove a remote file or directory tree
    ///
    /// # Errors
    /// Returns a transport error or `ExecError::ScriptFailed`
    pub async fn delete(&self, path: &str) -> Result<(), ExecError> {
        self.exec_checked(&self.config.dialect.delete_command(path))
            .await
            .map(|_| ())
    }
}
