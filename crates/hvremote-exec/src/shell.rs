//! Command rewriting before a script reaches the remote shell
//!
//! Two shapes exist. The inline shape prefixes the environment prelude and,
//! when configured, wraps the command in the escalation command
//! (`sudo -u root bash -c '...'`). The script-host shape hands a whole
//! PowerShell script to `powershell -EncodedCommand`, which sidesteps every
//! quoting layer between the SSH server and PowerShell.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::config::ConnectionConfig;
use crate::dialect::Dialect;

/// Prefix `command` with the environment prelude, if any
#[must_use]
pub fn with_prelude(vars: Option<&str>, command: &str) -> String {
    match vars {
        Some(vars) => format!("{vars}; {command}"),
        None => command.to_string(),
    }
}

/// Run `command` as `user` through `escalation` (e.g. `sudo`)
///
/// Embedded single quotes are escaped so the payload survives the
/// surrounding `bash -c '...'`.
#[must_use]
pub fn escalate(escalation: &str, user: &str, command: &str) -> String {
    format!(
        "{escalation} -u {user} bash -c '{}'",
        command.replace('\'', "'\\''")
    )
}

/// Inline rewrite: prelude first, then escalation
#[must_use]
pub fn inline_command(config: &ConnectionConfig, command: &str) -> String {
    let command = with_prelude(config.vars(), command);
    match config.escalation() {
        Some((escalation, user)) => escalate(escalation, user, &command),
        None => command,
    }
}

/// Encode a script for `powershell -EncodedCommand` (base64 of UTF-16LE)
#[must_use]
pub fn encode_powershell(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

/// Command line running `script` through the remote script host
///
/// On Windows the prelude is placed inside the script and, with elevated
/// credentials configured, the script runs as that identity via
/// `Invoke-Command`. POSIX hosts get the inline rewrite.
#[must_use]
pub fn script_host_command(config: &ConnectionConfig, script: &str) -> String {
    match config.dialect {
        Dialect::Posix => inline_command(config, script),
        Dialect::Windows => {
            let body = match config.vars() {
                Some(vars) => format!("{vars}\n{script}"),
                None => script.to_string(),
            };
            let body = match config.elevated_credentials() {
                Some((user, password)) => run_as(user, password, &body),
                None => body,
            };
            format!(
                "powershell -NoProfile -NonInteractive -ExecutionPolicy Bypass -EncodedCommand {}",
                encode_powershell(&body)
            )
        }
    }
}

fn run_as(user: &str, password: &str, body: &str) -> String {
    let quote = |v: &str| Dialect::Windows.quote(v);
    format!(
        "$ErrorActionPreference = 'Stop'\n\
         $secure = ConvertTo-SecureString {} -AsPlainText -Force\n\
         $credential = New-Object System.Management.Automation.PSCredential({}, $secure)\n\
         Invoke-Command -ComputerName localhost -Credential $credential -ScriptBlock {{\n\
         {body}\n\
         if ($LASTEXITCODE) {{ throw \"exit code $LASTEXITCODE\" }}\n\
         }}",
        quote(password),
        quote(user),
    )
}
