//! Remote execution over SSH
//!
//! Every operation opens its own authenticated connection, does its work and
//! disconnects before returning, whether the work succeeded or not. Shells
//! are the exception: the returned handle owns its connection until closed.

pub mod keys;
mod session;
mod sftp;
mod shell;

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh_keys::key::KeyPair;
use tokio::sync::OnceCell;

use gs_core::config::SshConfig;
use gs_core::error::RemoteError;
use gs_core::traits::{CommandOutput, RemoteEntry, RemoteExecutor, ShellHandle};
use gs_core::types::TerminalSize;

pub use keys::{ensure_key_pair, public_key_path, KeyAlgorithm};
pub use sftp::join_remote;
pub use shell::SshShell;

use session::RemoteSession;

/// SSH/SFTP implementation of [`RemoteExecutor`]
pub struct SshManager {
    config: SshConfig,
    /// Public key, created or read once per process
    public_key: OnceCell<String>,
    /// Private key, loaded on first use
    key: OnceCell<Arc<KeyPair>>,
}

impl SshManager {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            public_key: OnceCell::new(),
            key: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    async fn key(&self) -> Result<Arc<KeyPair>, RemoteError> {
        let key = self
            .key
            .get_or_try_init(|| async {
                self.public_key().await?;
                let key = russh_keys::load_secret_key(&self.config.key_path, None).map_err(|e| {
                    RemoteError::KeyPair(format!(
                        "Failed to load key from {:?}: {}",
                        self.config.key_path, e
                    ))
                })?;
                Ok::<_, RemoteError>(Arc::new(key))
            })
            .await?;
        Ok(Arc::clone(key))
    }

    async fn public_key(&self) -> Result<String, RemoteError> {
        self.public_key
            .get_or_try_init(|| ensure_key_pair(&self.config.key_path, KeyAlgorithm::default()))
            .await
            .cloned()
    }

    async fn connect(&self, address: Ipv4Addr) -> Result<RemoteSession, RemoteError> {
        RemoteSession::open(
            address,
            self.config.port,
            &self.config.username,
            self.key().await?,
            self.config.connect_timeout,
        )
        .await
    }

    async fn write_with_mode(
        session: &RemoteSession,
        remote_path: &str,
        content: &[u8],
        mode: Option<u32>,
    ) -> Result<(), RemoteError> {
        let sftp = sftp::open(session).await?;
        sftp::write_file(&sftp, remote_path, content).await?;
        if let Some(mode) = mode {
            sftp::set_mode(&sftp, remote_path, mode).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshManager {
    async fn execute(
        &self,
        address: Ipv4Addr,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let session = self.connect(address).await?;

        tracing::trace!("Executing on {}: {}", address, command);
        let result = match tokio::time::timeout(timeout, session.exec(command)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        };

        session.close().await;
        result
    }

    async fn upload_file(
        &self,
        address: Ipv4Addr,
        local_path: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<(), RemoteError> {
        let content = tokio::fs::read(local_path).await.map_err(|e| {
            RemoteError::Transfer(format!("Failed to read local file {:?}: {}", local_path, e))
        })?;

        let session = self.connect(address).await?;
        let result = Self::write_with_mode(&session, remote_path, &content, Some(mode)).await;
        session.close().await;

        if result.is_ok() {
            tracing::debug!(
                "Uploaded {:?} to {}:{} ({} bytes)",
                local_path,
                address,
                remote_path,
                content.len()
            );
        }
        result
    }

    async fn write_remote_file(
        &self,
        address: Ipv4Addr,
        remote_path: &str,
        content: &[u8],
    ) -> Result<(), RemoteError> {
        let session = self.connect(address).await?;
        let result = Self::write_with_mode(&session, remote_path, content, None).await;
        session.close().await;
        result
    }

    async fn open_shell(
        &self,
        address: Ipv4Addr,
        size: TerminalSize,
    ) -> Result<Box<dyn ShellHandle>, RemoteError> {
        let session = self.connect(address).await?;
        let shell = SshShell::open(session, size).await?;
        Ok(Box::new(shell))
    }

    async fn ensure_key_pair(&self) -> Result<String, RemoteError> {
        self.public_key().await
    }

    async fn list_dir(
        &self,
        address: Ipv4Addr,
        path: &str,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let session = self.connect(address).await?;
        let result = match sftp::open(&session).await {
            Ok(client) => sftp::list_dir(&client, path).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }

    async fn read_remote_file(
        &self,
        address: Ipv4Addr,
        path: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        let session = self.connect(address).await?;
        let result = match sftp::open(&session).await {
            Ok(client) => sftp::read_file(&client, path).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }

    async fn remove_remote_file(&self, address: Ipv4Addr, path: &str) -> Result<(), RemoteError> {
        let session = self.connect(address).await?;
        let result = match sftp::open(&session).await {
            Ok(client) => sftp::remove_file(&client, path).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }
}
