//! Connection and transport traits

use std::path::Path;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::context::ExecContext;
use crate::error::ExecError;
use crate::result::{CommandResult, ExitReport};

/// One live, authenticated channel to a remote host
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a command in a fresh session and collect its output
    async fn exec(&self, command: &str) -> Result<CommandResult, ExecError>;

    /// Write `data` to `remote_path` over the structured file-transfer channel
    ///
    /// `parent_dir` is created first when given; failing to create it is not
    /// an error since it may already exist.
    async fn put_file(
        &self,
        remote_path: &str,
        parent_dir: Option<&str>,
        data: &[u8],
    ) -> Result<(), ExecError>;

    /// Whether the connection is known to be dead
    fn is_closed(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<(), ExecError>;
}

/// Dials new connections for a transport or pool
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector
    type Connection: Connection + 'static;

    /// Open and authenticate a connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection, ExecError>;

    /// Short name used in logs
    fn kind(&self) -> &'static str;
}

/// Remote execution and file transfer against one host
///
/// Implemented by the pooled and the ephemeral transport. Every operation
/// honours the context's deadline and cancellation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a script, returning its exit status and stderr
    async fn run_fire_and_forget(
        &self,
        ctx: &ExecContext,
        script: &str,
    ) -> Result<ExitReport, ExecError>;

    /// Run a script, returning stdout, stderr and exit status
    async fn run_with_result(
        &self,
        ctx: &ExecContext,
        script: &str,
    ) -> Result<CommandResult, ExecError>;

    /// Upload a local file, returning the final remote path
    ///
    /// If `remote_path` is empty or ends in a separator, the local file name
    /// is appended.
    async fn upload_file(
        &self,
        ctx: &ExecContext,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<String, ExecError>;

    /// Upload a directory tree into a fresh remote directory
    ///
    /// Returns the remote root and the remote path of every uploaded file,
    /// in walk order.
    async fn upload_directory(
        &self,
        ctx: &ExecContext,
        local_root: &Path,
        exclude: &[String],
    ) -> Result<(String, Vec<String>), ExecError>;

    /// Whether a remote file exists
    async fn file_exists(&self, ctx: &ExecContext, remote_path: &str) -> Result<bool, ExecError>;

    /// Whether a remote directory exists
    async fn directory_exists(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<bool, ExecError>;

    /// Remove a remote file or directory tree
    async fn delete_file_or_directory(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<(), ExecError>;

    /// Short name used in logs
    fn transport_type(&self) -> &'static str;
}
