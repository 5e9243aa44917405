//! Transport that dials a fresh connection for every operation
//!
//! Each operation walks `Idle -> Connecting -> Connected -> Executing ->
//! Succeeded | Failed -> Closed`. A failed dial goes straight to `Closed`;
//! every other path closes the connection before returning, errors
//! included. Commands get the environment prelude and escalation prefix
//! inline.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::ConnectionConfig;
use crate::context::ExecContext;
use crate::error::ExecError;
use crate::result::{CommandResult, ExitReport};
use crate::session::{CommandStyle, RemoteSession};
use crate::ssh::SshConnector;
use crate::traits::{Connection, Connector, Transport};
use crate::transfer::{self, FallbackChain};

/// One connection per logical operation
#[derive(Debug, Clone)]
pub struct EphemeralTransport<C: Connector = SshConnector> {
    connector: C,
    config: Arc<ConnectionConfig>,
}

impl EphemeralTransport<SshConnector> {
    /// Ephemeral transport over SSH
    #[must_use]
    pub fn new(config: Arc<ConnectionConfig>) -> Self {
        Self::with_connector(SshConnector::new(), config)
    }
}

impl<C: Connector> EphemeralTransport<C> {
    /// Ephemeral transport dialling through `connector`
    #[must_use]
    pub fn with_connector(connector: C, config: Arc<ConnectionConfig>) -> Self {
        Self { connector, config }
    }

    /// Config every operation connects with
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Context bounded by the command timeout unless the caller set a deadline
    fn bounded(&self, ctx: &ExecContext) -> ExecContext {
        ctx.or_timeout(self.config.command_timeout())
    }

    async fn open(&self, ctx: &ExecContext, op: &'static str) -> Result<C::Connection, ExecError> {
        debug!(op, state = "connecting", connector = self.connector.kind());
        match ctx.run(self.connector.connect(&self.config)).await {
            Ok(conn) => {
                debug!(op, state = "connected");
                Ok(conn)
            }
            Err(e) => {
                debug!(op, state = "closed", error = %e, "connect failed");
                Err(e)
            }
        }
    }

    fn session<'a>(&'a self, conn: &'a C::Connection) -> RemoteSession<'a> {
        RemoteSession::new(conn, &self.config, CommandStyle::Inline)
    }

    async fn finish<T>(
        &self,
        conn: C::Connection,
        op: &'static str,
        result: Result<T, ExecError>,
    ) -> Result<T, ExecError> {
        match &result {
            Ok(_) => debug!(op, state = "succeeded"),
            Err(e) => debug!(op, state = "failed", error = %e),
        }
        if let Err(e) = conn.close().await {
            debug!(op, error = %e, "failed to close connection");
        }
        debug!(op, state = "closed");
        result
    }
}

#[async_trait]
impl<C: Connector> Transport for EphemeralTransport<C> {
    #[instrument(skip(self, ctx, script), fields(host = %self.config.host))]
    async fn run_fire_and_forget(
        &self,
        ctx: &ExecContext,
        script: &str,
    ) -> Result<ExitReport, ExecError> {
        let ctx = self.bounded(ctx);
        let conn = self.open(&ctx, "run_fire_and_forget").await?;
        debug!(state = "executing");
        let result = ctx.run(self.session(&conn).run_script(script)).await;
        self.finish(conn, "run_fire_and_forget", result.map(ExitReport::from))
            .await
    }

    #[instrument(skip(self, ctx, script), fields(host = %self.config.host))]
    async fn run_with_result(
        &self,
        ctx: &ExecContext,
        script: &str,
    ) -> Result<CommandResult, ExecError> {
        let ctx = self.bounded(ctx);
        let conn = self.open(&ctx, "run_with_result").await?;
        debug!(state = "executing");
        let result = ctx.run(self.session(&conn).run_script(script)).await;
        self.finish(conn, "run_with_result", result).await
    }

    #[instrument(skip(self, ctx), fields(host = %self.config.host))]
    async fn upload_file(
        &self,
        ctx: &ExecContext,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<String, ExecError> {
        let ctx = self.bounded(ctx);
        let conn = self.open(&ctx, "upload_file").await?;
        let chain = FallbackChain::default();
        let result = ctx
            .run(transfer::upload_file(
                &self.session(&conn),
                &chain,
                local_path,
                remote_path,
            ))
            .await;
        self.finish(conn, "upload_file", result).await
    }

    #[instrument(skip(self, ctx), fields(host = %self.config.host))]
    async fn upload_directory(
        &self,
        ctx: &ExecContext,
        local_root: &Path,
        exclude: &[String],
    ) -> Result<(String, Vec<String>), ExecError> {
        let ctx = self.bounded(ctx);
        let remote_root = transfer::next_upload_root(
            self.config.dialect,
            self.config.remote_temp_dir.as_deref(),
        );

        let conn = self.open(&ctx, "upload_directory").await?;
        let result = ctx
            .run(transfer::upload_tree(
                &self.session(&conn),
                local_root,
                &remote_root,
                exclude,
            ))
            .await;
        self.finish(conn, "upload_directory", result)
            .await
            .map(|files| (remote_root, files))
    }

    #[instrument(skip(self, ctx), fields(host = %self.config.host))]
    async fn file_exists(&self, ctx: &ExecContext, remote_path: &str) -> Result<bool, ExecError> {
        let ctx = self.bounded(ctx);
        let conn = self.open(&ctx, "file_exists").await?;
        let result = ctx.run(self.session(&conn).file_exists(remote_path)).await;
        self.finish(conn, "file_exists", result).await
    }

    #[instrument(skip(self, ctx), fields(host = %self.config.host))]
    async fn directory_exists(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<bool, ExecError> {
        let ctx = self.bounded(ctx);
        let conn = self.open(&ctx, "directory_exists").await?;
        let result = ctx
            .run(self.session(&conn).directory_exists(remote_path))
            .await;
        self.finish(conn, "directory_exists", result).await
    }

    #[instrument(skip(self, ctx), fields(host = %self.config.host))]
    async fn delete_file_or_directory(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<(), ExecError> {
        let ctx = self.bounded(ctx);
        let conn = self.open(&ctx, "delete_file_or_directory").await?;
        let result = ctx.run(self.session(&conn).delete(remote_path)).await;
        self.finish(conn, "delete_file_or_directory", result).await
    }

    fn transport_type(&self) -> &'static str {
        "ephemeral"
    }
}
