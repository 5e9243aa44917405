//! Transport over a pool of long-lived connections
//!
//! Every operation borrows a connection, runs, and returns it through the
//! pool guard. The borrow happens inside the context's race, so a timed
//! out or cancelled operation drops its guard and the connection goes back
//! to the pool. Scripts are sent through the script host; helper commands
//! (probes, mkdir, delete, base64 writes) are sent as they are.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::ConnectionConfig;
use crate::context::ExecContext;
use crate::error::ExecError;
use crate::pool::{Pool, PoolStats};
use crate::result::{CommandResult, ExitReport};
use crate::session::{CommandStyle, RemoteSession};
use crate::ssh::SshConnector;
use crate::traits::{Connector, Transport};
use crate::transfer::{self, FallbackChain};

/// Transport reusing pooled connections
#[derive(Debug, Clone)]
pub struct PooledTransport<C: Connector = SshConnector> {
    pool: Pool<C>,
}

impl PooledTransport<SshConnector> {
    /// Pooled transport over SSH
    #[must_use]
    pub fn new(config: Arc<ConnectionConfig>) -> Self {
        Self::with_connector(SshConnector::new(), config)
    }
}

impl<C: Connector> PooledTransport<C> {
    /// Pooled transport dialling through `connector`
    #[must_use]
    pub fn with_connector(connector: C, config: Arc<ConnectionConfig>) -> Self {
        Self::from_pool(Pool::new(connector, config))
    }

    /// Pooled transport over an existing pool
    #[must_use]
    pub fn from_pool(pool: Pool<C>) -> Self {
        Self { pool }
    }

    /// The underlying pool
    #[must_use]
    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    /// Pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Dial `min_idle` connections ahead of the first operation
    ///
    /// # Errors
    /// Returns the first dial error
    pub async fn warm_up(&self) -> Result<(), ExecError> {
        self.pool.warm_up().await
    }

    /// Close the pool; later operations fail with `ExecError::PoolClosed`
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn bounded(&self, ctx: &ExecContext) -> ExecContext {
        ctx.or_timeout(self.pool.config().command_timeout())
    }

    async fn script(&self, ctx: &ExecContext, script: &str) -> Result<CommandResult, ExecError> {
        self.bounded(ctx)
            .run(async {
                let conn = self.pool.get().await?;
                debug!(stats = ?self.pool.stats(), "borrowed pooled connection");
                let session =
                    RemoteSession::new(&*conn, self.pool.config(), CommandStyle::ScriptHost);
                session.run_script(script).await
            })
            .await
    }
}

#[async_trait]
impl<C: Connector> Transport for PooledTransport<C> {
    #[instrument(skip(self, ctx, script), fields(host = %self.pool.config().host))]
    async fn run_fire_and_forget(
        &self,
        ctx: &ExecContext,
        script: &str,
    ) -> Result<ExitReport, ExecError> {
        self.script(ctx, script).await.map(ExitReport::from)
    }

    #[instrument(skip(self, ctx, script), fields(host = %self.pool.config().host))]
    async fn run_with_result(
        &self,
        ctx: &ExecContext,
        script: &str,
    ) -> Result<CommandResult, ExecError> {
        self.script(ctx, script).await
    }

    #[instrument(skip(self, ctx), fields(host = %self.pool.config().host))]
    async fn upload_file(
        &self,
        ctx: &ExecContext,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<String, ExecError> {
        self.bounded(ctx)
            .run(async {
                let conn = self.pool.get().await?;
                let session =
                    RemoteSession::new(&*conn, self.pool.config(), CommandStyle::ScriptHost);
                let chain = FallbackChain::default();
                transfer::upload_file(&session, &chain, local_path, remote_path).await
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(host = %self.pool.config().host))]
    async fn upload_directory(
        &self,
        ctx: &ExecContext,
        local_root: &Path,
        exclude: &[String],
    ) -> Result<(String, Vec<String>), ExecError> {
        let config = self.pool.config();
        let remote_root =
            transfer::next_upload_root(config.dialect, config.remote_temp_dir.as_deref());

        let files = self
            .bounded(ctx)
            .run(async {
                let conn = self.pool.get().await?;
                let session = RemoteSession::new(&*conn, config, CommandStyle::ScriptHost);
                transfer::upload_tree(&session, local_root, &remote_root, exclude).await
            })
            .await?;
        Ok((remote_root, files))
    }

    #[instrument(skip(self, ctx), fields(host = %self.pool.config().host))]
    async fn file_exists(&self, ctx: &ExecContext, remote_path: &str) -> Result<bool, ExecError> {
        self.bounded(ctx)
            .run(async {
                let conn = self.pool.get().await?;
                let session =
                    RemoteSession::new(&*conn, self.pool.config(), CommandStyle::ScriptHost);
                session.file_exists(remote_path).await
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(host = %self.pool.config().host))]
    async fn directory_exists(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<bool, ExecError> {
        self.bounded(ctx)
            .run(async {
                let conn = self.pool.get().await?;
                let session =
                    RemoteSession::new(&*conn, self.pool.config(), CommandStyle::ScriptHost);
                session.directory_exists(remote_path).await
            })
            .await
    }

    #[instrument(skip(self, ctx), fields(host = %self.pool.config().host))]
    async fn delete_file_or_directory(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<(), ExecError> {
        self.bounded(ctx)
            .run(async {
                let conn = self.pool.get().await?;
                let session =
                    RemoteSession::new(&*conn, self.pool.config(), CommandStyle::ScriptHost);
                session.delete(remote_path).await
            })
            .await
    }

    fn transport_type(&self) -> &'static str {
        "pooled"
    }
}
