//! Fire-and-forget and result-returning script invocation
//!
//! Both shapes render a [`Template`], run it through any [`Transport`] and
//! require exit code 0. The result-returning shape then decodes the trimmed
//! stdout as one JSON value. A decode failure keeps the exit code, stdout,
//! stderr and command text so the remote side can be diagnosed without
//! running the script again.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::template::Template;
use crate::traits::Transport;

/// Template-level invocation, available on every [`Transport`]
#[async_trait]
pub trait ScriptRunner: Transport {
    /// Render and run a script, requiring exit code 0
    ///
    /// # Errors
    /// Returns `ExecError::Template` if rendering fails, a transport error,
    /// or `ExecError::ScriptFailed` with the exit code and stderr
    async fn run_script<A>(
        &self,
        ctx: &ExecContext,
        template: &Template<'_>,
        args: &A,
    ) -> Result<(), ExecError>
    where
        A: Serialize + Sync + ?Sized,
    {
        let script = template.render(args)?;
        debug!(template = template.name(), script = %script, "running script");

        let report = self.run_fire_and_forget(ctx, script.as_str()).await?;
        if report.status != 0 {
            error!(
                template = template.name(),
                status = report.status,
                stderr = %report.stderr,
                "script failed"
            );
            return Err(ExecError::ScriptFailed {
                exit_code: report.status,
                stdout: String::new(),
                stderr: report.stderr,
                command: script.into_string(),
            });
        }
        Ok(())
    }

    /// Render and run a script, decoding its stdout as JSON
    ///
    /// # Errors
    /// Returns `ExecError::Template` if rendering fails, a transport error,
    /// `ExecError::ScriptFailed` for a non-zero exit or
    /// `ExecError::ResultDecode` when stdout is not the expected JSON
    async fn run_script_with_result<T, A>(
        &self,
        ctx: &ExecContext,
        template: &Template<'_>,
        args: &A,
    ) -> Result<T, ExecError>
    where
        T: DeserializeOwned + Send,
        A: Serialize + Sync + ?Sized,
    {
        let script = template.render(args)?;
        debug!(template = template.name(), script = %script, "running script with result");

        let command = script.into_string();
        let result = self.run_with_result(ctx, &command).await?.check(&command)?;

        let stdout = result.stdout.trim();
        serde_json::from_str(stdout).map_err(|e| {
            error!(template = template.name(), error = %e, "failed to decode script result");
            ExecError::ResultDecode {
                exit_code: result.status,
                stdout: stdout.to_string(),
                stderr: result.stderr.clone(),
                error: e.to_string(),
                command: command.clone(),
            }
        })
    }
}

impl<T: Transport + ?Sized> ScriptRunner for T {}
