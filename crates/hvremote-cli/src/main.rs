//! hvremote CLI
//!
//! Runs scripts and file transfers against a Hyper-V host over SSH

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use hvremote_exec::{
    ConnectionConfig, EphemeralTransport, ExecContext, LocalConnector, PooledTransport, Transport,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::{CliConfig, Config, LogFormat, TransportKind};

#[derive(Parser)]
#[command(name = "hvremote")]
#[command(about = "Remote execution and file transfer for Hyper-V hosts", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Transport to use, overrides the configuration
    #[arg(short, long, global = true, value_enum)]
    transport: Option<TransportKind>,

    /// Per-command timeout in seconds, overrides the configuration
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script template, reporting only success or failure
    Run {
        /// Script template file
        script: PathBuf,
        /// Template argument as KEY=VALUE
        #[arg(short, long)]
        arg: Vec<String>,
    },
    /// Run a script template that prints JSON and show the decoded result
    Query {
        /// Script template file
        script: PathBuf,
        /// Template argument as KEY=VALUE
        #[arg(short, long)]
        arg: Vec<String>,
    },
    /// Upload a file
    Upload {
        local: PathBuf,
        /// Remote file path, or a directory ending in a separator
        remote: String,
    },
    /// Upload a directory tree into a fresh remote directory
    #[command(name = "upload-dir")]
    UploadDir {
        local: PathBuf,
        /// Glob of relative paths to skip
        #[arg(short, long)]
        exclude: Vec<String>,
    },
    /// Check whether a remote file exists
    Exists {
        remote: String,
        /// Check for a directory instead
        #[arg(long)]
        dir: bool,
    },
    /// Remove a remote file or directory
    Rm { remote: String },
    /// Print the SHA-256 of a remote file
    Hash { remote: String },
}

fn init_tracing(cli: &CliConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = Config::discover(cli.config.as_deref())?;
    init_tracing(&config.cli);

    let mut connection = config.connection()?;
    if let Some(secs) = cli.timeout {
        connection = connection.with_command_timeout(Duration::from_secs(secs));
        connection.validate()?;
    }
    let kind = cli.transport.unwrap_or(config.cli.transport);
    tracing::debug!(host = %connection.host, transport = ?kind, "starting");

    run(kind, Arc::new(connection), cli.command, interruptible()).await
}

/// Context cancelled on Ctrl-C
fn interruptible() -> ExecContext {
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });
    ExecContext::new().with_token(token)
}

async fn run(
    kind: TransportKind,
    connection: Arc<ConnectionConfig>,
    command: Commands,
    ctx: ExecContext,
) -> Result<()> {
    let local = connection.host == "localhost";

    match kind {
        TransportKind::Pooled if local => {
            let transport = Arc::new(PooledTransport::with_connector(
                LocalConnector::new(),
                connection,
            ));
            let shared: Arc<dyn Transport> = transport.clone();
            let result = commands::execute(shared, &ctx, command).await;
            transport.close().await;
            result
        }
        TransportKind::Pooled => {
            let transport = Arc::new(PooledTransport::new(connection));
            let shared: Arc<dyn Transport> = transport.clone();
            let result = commands::execute(shared, &ctx, command).await;
            transport.close().await;
            result
        }
        TransportKind::Ephemeral if local => {
            let transport = EphemeralTransport::with_connector(LocalConnector::new(), connection);
            commands::execute(Arc::new(transport), &ctx, command).await
        }
        TransportKind::Ephemeral => {
            let transport = EphemeralTransport::new(connection);
            commands::execute(Arc::new(transport), &ctx, command).await
        }
    }
}
