//! Hyper-V host client and remote file helpers

use std::path::Path;
use std::sync::Arc;

use hvremote_exec::{ExecContext, ScriptRunner, Template, Transport};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::HypervError;

const REMOTE_FILE_HASH: Template<'static> = Template::new(
    "RemoteFileHash",
    r#"$ErrorActionPreference = 'Stop'
$path = '{{FilePath}}'
if (-not (Test-Path -LiteralPath $path -PathType Leaf)) {
    throw "no such file: $path"
}
$hash = (Get-FileHash -LiteralPath $path -Algorithm SHA256).Hash.ToLowerInvariant()
ConvertTo-Json -InputObject $hash
"#,
);

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct FilePathArgs<'a> {
    file_path: &'a str,
}

/// Operations against one Hyper-V host
///
/// Works over any transport; which one is a deployment choice.
#[derive(Clone)]
pub struct HypervClient {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for HypervClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HypervClient")
            .field("transport", &self.transport.transport_type())
            .finish()
    }
}

impl HypervClient {
    /// Create a client over `transport`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The transport operations run on
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Upload a local file, returning the final remote path
    ///
    /// # Errors
    /// Returns `HypervError::Exec` if every upload strategy fails
    #[instrument(skip(self, ctx))]
    pub async fn remote_file_upload(
        &self,
        ctx: &ExecContext,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<String, HypervError> {
        let remote = self
            .transport
            .upload_file(ctx, local_path, remote_path)
            .await?;
        info!(remote_path = %remote, "file uploaded");
        Ok(remote)
    }

    /// Remove a remote file or directory
    ///
    /// # Errors
    /// Returns `HypervError::Exec` if the delete command fails
    #[instrument(skip(self, ctx))]
    pub async fn remote_file_delete(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<(), HypervError> {
        Ok(self
            .transport
            .delete_file_or_directory(ctx, remote_path)
            .await?)
    }

    /// Whether a remote file exists
    ///
    /// # Errors
    /// Returns `HypervError::Exec` if the probe could not run
    #[instrument(skip(self, ctx))]
    pub async fn remote_file_exists(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<bool, HypervError> {
        Ok(self.transport.file_exists(ctx, remote_path).await?)
    }

    /// Lower-case hex SHA-256 of a remote file
    ///
    /// # Errors
    /// Returns `HypervError::Exec` if the file is missing or the script fails
    #[instrument(skip(self, ctx))]
    pub async fn remote_file_hash(
        &self,
        ctx: &ExecContext,
        remote_path: &str,
    ) -> Result<String, HypervError> {
        let hash: String = self
            .transport
            .run_script_with_result(
                ctx,
                &REMOTE_FILE_HASH,
                &FilePathArgs {
                    file_path: remote_path,
                },
            )
            .await?;
        Ok(hash)
    }
}
