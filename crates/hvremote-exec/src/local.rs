//! Local connections using `tokio::process`
//!
//! Runs the whole layer against the local machine: commands go through the
//! platform shell and the structured file transfer is a plain filesystem
//! write.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::config::ConnectionConfig;
use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::{Connection, Connector};

/// Connector producing [`LocalConnection`]s
#[derive(Debug, Clone)]
pub struct LocalConnector {
    structured_transfer: bool,
}

impl LocalConnector {
    /// Create a new local connector
    #[must_use]
    pub fn new() -> Self {
        Self {
            structured_transfer: true,
        }
    }

    /// Connector whose connections refuse structured transfers
    ///
    /// Uploads then always go through the command-based fallback.
    #[must_use]
    pub fn without_structured_transfer() -> Self {
        Self {
            structured_transfer: false,
        }
    }
}

impl Default for LocalConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for LocalConnector {
    type Connection = LocalConnection;

    async fn connect(&self, _config: &ConnectionConfig) -> Result<LocalConnection, ExecError> {
        Ok(LocalConnection {
            structured_transfer: self.structured_transfer,
            closed: AtomicBool::new(false),
        })
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

/// Connection to the local machine
#[derive(Debug)]
pub struct LocalConnection {
    structured_transfer: bool,
    closed: AtomicBool,
}

fn shell(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(cmd);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        command
    }
}

#[async_trait]
impl Connection for LocalConnection {
    #[instrument(skip(self, cmd), level = "debug")]
    async fn exec(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        if self.is_closed() {
            return Err(ExecError::Channel("connection closed".to_string()));
        }

        let start = Instant::now();

        debug!(command = %cmd, "executing local command");

        let output = shell(cmd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Channel(format!("failed to spawn process: {e}")))?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(status = status, duration = ?duration, "command completed");

        if !output.status.success() {
            error!(status = status, stderr = %stderr, "command failed");
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    async fn put_file(
        &self,
        remote_path: &str,
        parent_dir: Option<&str>,
        data: &[u8],
    ) -> Result<(), ExecError> {
        if !self.structured_transfer {
            return Err(ExecError::Channel(
                "structured transfer disabled for this connection".to_string(),
            ));
        }

        if let Some(dir) = parent_dir
            && let Err(e) = tokio::fs::create_dir_all(dir).await
        {
            debug!(path = %dir, error = %e, "failed to create directory");
        }

        tokio::fs::write(Path::new(remote_path), data)
            .await
            .map_err(|e| ExecError::Channel(format!("failed to write {remote_path}: {e}")))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
