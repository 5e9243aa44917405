//! File transfer strategies and directory upload
//!
//! Uploads try an ordered list of [`UploadStrategy`]s: the structured
//! transfer of the connection first, then embedding the content as base64 in
//! shell commands. The first success wins; if every strategy fails their
//! errors are reported together. Within one [`FallbackChain`] a strategy
//! that failed is not tried again once a later one has succeeded, so a
//! directory upload against a host without SFTP pays for the failed attempt
//! only once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::dialect::Dialect;
use crate::error::ExecError;
use crate::session::RemoteSession;

/// Raw bytes per base64 command; keeps each command line well below
/// the Windows limit of 8191 characters once encoded and wrapped
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// One way of getting bytes onto the remote host
#[async_trait]
pub trait UploadStrategy: Send + Sync {
    /// Short name used in logs and error messages
    fn name(&self) -> &'static str;

    /// Write `data` to `remote_path`, creating the parent best-effort
    async fn upload(
        &self,
        session: &RemoteSession<'_>,
        remote_path: &str,
        data: &[u8],
    ) -> Result<(), ExecError>;
}

/// Structured transfer over the connection (SFTP for SSH)
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredCopy;

#[async_trait]
impl UploadStrategy for StructuredCopy {
    fn name(&self) -> &'static str {
        "structured"
    }

    async fn upload(
        &self,
        session: &RemoteSession<'_>,
        remote_path: &str,
        data: &[u8],
    ) -> Result<(), ExecError> {
        let parent = session.config().dialect.parent(remote_path);
        session
            .connection()
            .put_file(remote_path, parent.as_deref(), data)
            .await
    }
}

/// Base64 content decoded by remote shell commands
#[derive(Debug, Clone, Copy)]
pub struct Base64Embed {
    chunk_size: usize,
}

impl Base64Embed {
    /// Strategy writing `chunk_size` raw bytes per command
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for Base64Embed {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[async_trait]
impl UploadStrategy for Base64Embed {
    fn name(&self) -> &'static str {
        "base64"
    }

    async fn upload(
        &self,
        session: &RemoteSession<'_>,
        remote_path: &str,
        data: &[u8],
    ) -> Result<(), ExecError> {
        let dialect = session.config().dialect;
        if let Some(parent) = dialect.parent(remote_path) {
            session.mkdir_best_effort(&parent).await;
        }

        // an empty file still needs one write to be created
        let mut chunks: Vec<&[u8]> = data.chunks(self.chunk_size).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        for (i, chunk) in chunks.into_iter().enumerate() {
            let encoded = STANDARD.encode(chunk);
            session
                .exec_checked(&dialect.write_base64_command(remote_path, &encoded, i > 0))
                .await?;
        }
        Ok(())
    }
}

/// Ordered upload strategies for one logical operation
pub struct FallbackChain {
    strategies: Vec<Box<dyn UploadStrategy>>,
    first: AtomicUsize,
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("FallbackChain")
            .field("strategies", &names)
            .field("first", &self.first.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        let strategies: Vec<Box<dyn UploadStrategy>> =
            vec![Box::new(StructuredCopy), Box::new(Base64Embed::default())];
        Self::new(strategies)
    }
}

impl FallbackChain {
    /// Chain trying `strategies` in order
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn UploadStrategy>>) -> Self {
        Self {
            strategies,
            first: AtomicUsize::new(0),
        }
    }

    /// Upload `data`, falling back through the chain
    ///
    /// # Errors
    /// Returns `ExecError::Transfer` listing every failed attempt when no
    /// strategy succeeds
    pub async fn upload(
        &self,
        session: &RemoteSession<'_>,
        remote_path: &str,
        data: &[u8],
    ) -> Result<(), ExecError> {
        let start = self.first.load(Ordering::Acquire);
        let mut failures = Vec::new();

        for (i, strategy) in self.strategies.iter().enumerate().skip(start) {
            match strategy.upload(session, remote_path, data).await {
                Ok(()) => {
                    if i > start {
                        self.first.store(i, Ordering::Release);
                    }
                    debug!(
                        strategy = strategy.name(),
                        remote_path = %remote_path,
                        bytes = data.len(),
                        "upload complete"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        remote_path = %remote_path,
                        error = %e,
                        "upload strategy failed"
                    );
                    failures.push(format!("{}: {e}", strategy.name()));
                }
            }
        }

        Err(ExecError::Transfer {
            remote_path: remote_path.to_string(),
            failures,
        })
    }
}

/// Final remote path for an upload of `local_path` to `remote_path`
///
/// An empty destination or one ending in a separator gets the local file
/// name appended.
#[must_use]
pub fn resolve_remote_path(
    dialect: Dialect,
    local_path: &Path,
    remote_path: &str,
) -> String {
    if !dialect.is_dir_path(remote_path) {
        return remote_path.to_string();
    }
    let name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dialect.join(remote_path, &name)
}

/// Read a local file and upload it through `chain`
///
/// # Errors
/// Returns `ExecError::IoError` if the local file cannot be read, otherwise
/// the chain's error
pub async fn upload_file(
    session: &RemoteSession<'_>,
    chain: &FallbackChain,
    local_path: &Path,
    remote_path: &str,
) -> Result<String, ExecError> {
    let data = tokio::fs::read(local_path)
        .await
        .map_err(|e| ExecError::IoError(format!("failed to read {}: {e}", local_path.display())))?;
    let target = resolve_remote_path(session.config().dialect, local_path, remote_path);

    chain.upload(session, &target, &data).await?;
    Ok(target)
}

static UPLOAD_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Fresh remote root for a directory upload
///
/// The process id and a process-wide sequence number follow the timestamp,
/// so concurrent uploads never share a root.
#[must_use]
pub fn next_upload_root(dialect: Dialect, temp_dir: Option<&str>) -> String {
    let sequence = UPLOAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    dialect.upload_root(
        temp_dir,
        chrono::Utc::now().timestamp(),
        &format!("{}-{sequence}", std::process::id()),
    )
}

/// A file selected for a directory upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Absolute local path
    pub local: PathBuf,
    /// Path relative to the walk root, `/`-separated
    pub relative: String,
}

/// Collect the files under `root` not matched by any `exclude` glob
///
/// Patterns match the `/`-separated path relative to `root`; `*` does not
/// cross directories. An excluded directory is skipped with everything
/// below it. Files come back in file-name order, depth first.
///
/// # Errors
/// Returns `ExecError::Config` for an invalid pattern and
/// `ExecError::IoError` when the walk fails
pub fn walk_tree(root: &Path, exclude: &[String]) -> Result<Vec<WalkedFile>, ExecError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in exclude {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ExecError::Config(format!("invalid exclude pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    let patterns = builder
        .build()
        .map_err(|e| ExecError::Config(format!("invalid exclude patterns: {e}")))?;

    let filter_root = root.to_path_buf();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let relative = relative_path(&filter_root, entry.path());
            relative.is_empty() || !is_excluded(&patterns, &relative)
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| ExecError::IoError(format!("directory walk failed: {e}")))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        files.push(WalkedFile {
            relative: relative_path(root, entry.path()),
            local: entry.into_path(),
        });
    }
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_excluded(patterns: &GlobSet, relative: &str) -> bool {
    patterns.is_match(relative)
}

/// Upload a directory tree into `remote_root`
///
/// The root is created first and must succeed; each file's remote parent is
/// then created best-effort before the file is uploaded. The first failure
/// aborts the walk and files already uploaded stay in place.
///
/// # Errors
/// Returns `ExecError::DirectoryUpload` wrapping the first failure
pub async fn upload_tree(
    session: &RemoteSession<'_>,
    local_root: &Path,
    remote_root: &str,
    exclude: &[String],
) -> Result<Vec<String>, ExecError> {
    let wrap = |source: ExecError| ExecError::DirectoryUpload {
        local_root: local_root.display().to_string(),
        source: Box::new(source),
    };

    let files = walk_tree(local_root, exclude).map_err(wrap)?;
    let dialect = session.config().dialect;

    session
        .exec_checked(&dialect.mkdir_command(remote_root))
        .await
        .map_err(wrap)?;

    let chain = FallbackChain::default();
    let mut uploaded = Vec::with_capacity(files.len());
    for file in files {
        let remote_path = dialect.join(remote_root, &file.relative);
        if let Some(parent) = dialect.parent(&remote_path)
            && parent != remote_root
        {
            session.mkdir_best_effort(&parent).await;
        }

        upload_file(session, &chain, &file.local, &remote_path)
            .await
            .map_err(wrap)?;
        uploaded.push(remote_path);
    }

    info!(
        local_root = %local_root.display(),
        remote_root = %remote_root,
        files = uploaded.len(),
        "directory uploaded"
    );
    Ok(uploaded)
}
