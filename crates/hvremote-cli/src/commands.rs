//! Subcommand execution against a transport

use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr, eyre};
use hvremote_exec::{ExecContext, ScriptRunner, Template, Transport};
use hvremote_hyperv::HypervClient;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::Commands;

/// Parse `KEY=VALUE` pairs into script arguments
///
/// # Errors
/// Returns error if a pair has no `=` or an empty key
pub fn parse_args(pairs: &[String]) -> Result<Map<String, Value>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                Ok((key.to_string(), Value::String(value.to_string())))
            }
            _ => Err(eyre!("invalid argument '{pair}', expected KEY=VALUE")),
        })
        .collect()
}

fn read_script(path: &Path) -> Result<(String, String)> {
    let source = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read script {}", path.display()))?;
    let name = path
        .file_stem()
        .map_or_else(|| "script".to_string(), |s| s.to_string_lossy().into_owned());
    Ok((name, source))
}

/// Run one subcommand and print its result
///
/// # Errors
/// Returns the operation's error
pub async fn execute(
    transport: Arc<dyn Transport>,
    ctx: &ExecContext,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Run { script, arg } => {
            let (name, source) = read_script(&script)?;
            let args = parse_args(&arg)?;
            transport
                .run_script(ctx, &Template::new(&name, &source), &args)
                .await?;
            info!(script = %name, "script finished");
        }
        Commands::Query { script, arg } => {
            let (name, source) = read_script(&script)?;
            let args = parse_args(&arg)?;
            let value: Value = transport
                .run_script_with_result(ctx, &Template::new(&name, &source), &args)
                .await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Upload { local, remote } => {
            let remote = transport.upload_file(ctx, &local, &remote).await?;
            println!("{remote}");
        }
        Commands::UploadDir { local, exclude } => {
            let (root, files) = transport.upload_directory(ctx, &local, &exclude).await?;
            println!("{root}");
            for file in files {
                println!("  {file}");
            }
        }
        Commands::Exists { remote, dir } => {
            let exists = if dir {
                transport.directory_exists(ctx, &remote).await?
            } else {
                transport.file_exists(ctx, &remote).await?
            };
            println!("{exists}");
        }
        Commands::Rm { remote } => {
            transport.delete_file_or_directory(ctx, &remote).await?;
        }
        Commands::Hash { remote } => {
            let client = HypervClient::new(transport);
            let hash = client.remote_file_hash(ctx, &remote).await.inspect_err(|e| {
                if e.is_retryable() {
                    warn!(error = %e, "transient failure, the command can be retried");
                }
            })?;
            println!("{hash}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args_keeps_equals_in_value() {
        let args = parse_args(&["VmName=lab-01".to_string(), "Filter=a=b".to_string()]).unwrap();
        assert_eq!(args["VmName"], "lab-01");
        assert_eq!(args["Filter"], "a=b");
    }

    #[test]
    fn test_parse_args_rejects_missing_key() {
        assert!(parse_args(&["=value".to_string()]).is_err());
        assert!(parse_args(&["novalue".to_string()]).is_err());
    }
}
