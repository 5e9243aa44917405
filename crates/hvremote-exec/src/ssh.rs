//! SSH connections using the russh crate

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key;
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::config::ConnectionConfig;
use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::{Connection, Connector};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

/// Dials authenticated SSH connections
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl SshConnector {
    /// Create a new SSH connector
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Connection = SshConnection;

    #[instrument(skip(self, config), fields(host = %config.host, port = config.port))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<SshConnection, ExecError> {
        config.validate()?;

        info!(user = %config.user, "connecting to SSH");

        let ssh_config = Arc::new(client::Config {
            keepalive_interval: config.keepalive(),
            ..client::Config::default()
        });

        let dial = client::connect(
            ssh_config,
            (config.host.as_str(), config.port),
            SshClientHandler,
        );
        let mut session = timeout(config.connect_timeout(), dial)
            .await
            .map_err(|_| {
                ExecError::ConnectionFailed(format!(
                    "timed out after {:?} dialing {}:{}",
                    config.connect_timeout(),
                    config.host,
                    config.port
                ))
            })?
            .map_err(|e| {
                error!(error = %e, "failed to dial SSH");
                ExecError::ConnectionFailed(format!("failed to dial SSH: {e}"))
            })?;

        authenticate(&mut session, config).await?;

        info!("SSH connected and authenticated");

        Ok(SshConnection {
            host: config.host.clone(),
            session,
        })
    }

    fn kind(&self) -> &'static str {
        "ssh"
    }
}

/// Try password, then public key, in that order
async fn authenticate(
    session: &mut client::Handle<SshClientHandler>,
    config: &ConnectionConfig,
) -> Result<(), ExecError> {
    let mut failures = Vec::new();

    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        let auth_res = session
            .authenticate_password(&config.user, password)
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
        if auth_res.success() {
            return Ok(());
        }
        failures.push("password rejected");
    }

    if let Some(source) = config.key_source() {
        let key_pair = source
            .resolve()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &config.user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
        if auth_res.success() {
            return Ok(());
        }
        failures.push("public key rejected");
    }

    if failures.is_empty() {
        return Err(ExecError::Config(
            "no authentication method provided (password or private key required)".to_string(),
        ));
    }
    Err(ExecError::AuthenticationFailed(failures.join(", ")))
}

/// An authenticated SSH connection; every command gets its own channel
pub struct SshConnection {
    host: String,
    session: client::Handle<SshClientHandler>,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("host", &self.host)
            .field("closed", &self.session.is_closed())
            .finish_non_exhaustive()
    }
}

impl SshConnection {
    async fn open_sftp(&self) -> Result<SftpSession, ExecError> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Channel(format!("failed to create session: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ExecError::Channel(format!("sftp subsystem unavailable: {e}")))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ExecError::Channel(format!("failed to create SFTP client: {e}")))
    }
}

#[async_trait]
impl Connection for SshConnection {
    #[instrument(skip(self, command), fields(host = %self.host))]
    async fn exec(&self, command: &str) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Channel(format!("failed to create session: {e}")))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::Channel(format!("command execution failed: {e}")))?;

        let mut status = None;
        let mut signal = None;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // ExitStatus may arrive after Eof, so drain until the channel closes
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    status = Some(exit_status.cast_signed());
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    signal = Some(format!("{signal_name:?}"));
                }
                _ => {}
            }
        }

        let status = match (status, signal) {
            (Some(status), _) => status,
            (None, Some(signal)) => {
                debug!(signal = %signal, "remote command killed by signal");
                -1
            }
            (None, None) => {
                return Err(ExecError::Channel(
                    "command execution failed: channel closed without exit status".to_string(),
                ));
            }
        };

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        debug!(status = status, duration = ?duration, "remote command completed");

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    #[instrument(skip(self, data), fields(host = %self.host, bytes = data.len()))]
    async fn put_file(
        &self,
        remote_path: &str,
        parent_dir: Option<&str>,
        data: &[u8],
    ) -> Result<(), ExecError> {
        let sftp = self.open_sftp().await?;

        if let Some(dir) = parent_dir {
            sftp_create_dir_all(&sftp, dir).await;
        }

        let target = sftp_path(remote_path);
        let written = async {
            let mut file = sftp
                .create(target.clone())
                .await
                .map_err(|e| ExecError::Channel(format!("failed to create remote file: {e}")))?;
            file.write_all(data)
                .await
                .map_err(|e| ExecError::Channel(format!("failed to write file content: {e}")))?;
            file.shutdown()
                .await
                .map_err(|e| ExecError::Channel(format!("failed to close remote file: {e}")))
        }
        .await;

        if let Err(e) = sftp.close().await {
            debug!(error = %e, "failed to close SFTP session");
        }
        written
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    async fn close(&self) -> Result<(), ExecError> {
        if self.session.is_closed() {
            return Ok(());
        }
        self.session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| ExecError::Channel(e.to_string()))?;
        info!(host = %self.host, "SSH disconnected");
        Ok(())
    }
}

/// SFTP expects forward slashes, also on Windows servers
fn sftp_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Create `dir` and its parents one component at a time, ignoring failures
async fn sftp_create_dir_all(sftp: &SftpSession, dir: &str) {
    let dir = sftp_path(dir);
    let mut prefix = String::new();
    for (i, part) in dir.split('/').enumerate() {
        if i > 0 {
            prefix.push('/');
        }
        prefix.push_str(part);
        if part.is_empty() || part.ends_with(':') {
            continue;
        }
        if let Err(e) = sftp.create_dir(prefix.clone()).await {
            debug!(path = %prefix, error = %e, "failed to create remote directory via SFTP");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sftp_path() {
        assert_eq!(sftp_path("C:\\Temp\\a.iso"), "C:/Temp/a.iso");
        assert_eq!(sftp_path("/tmp/a"), "/tmp/a");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let config = ConnectionConfig::new("127.0.0.1", "nobody")
            .with_port(1)
            .with_password("pw");

        let err = SshConnector::new().connect(&config).await.unwrap_err();
        assert!(matches!(err, ExecError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_connect_without_credentials_is_config_error() {
        let config = ConnectionConfig::new("127.0.0.1", "nobody").with_port(1);

        let err = SshConnector::new().connect(&config).await.unwrap_err();
        assert!(matches!(err, ExecError::Config(_)));
    }

    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_ssh_roundtrip() {
        let host = std::env::var("SSH_TEST_HOST").unwrap();
        let config = ConnectionConfig::new(host, "root")
            .with_private_key_path("~/.ssh/id_ed25519");

        let conn = SshConnector::new().connect(&config).await.unwrap();
        let result = conn.exec("echo hello").await.unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        conn.close().await.unwrap();
    }
}
