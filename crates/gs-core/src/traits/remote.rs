//! Remote execution traits

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RemoteError;
use crate::types::TerminalSize;

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, if the remote side reported one
    pub exit_status: Option<u32>,
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Everything the controller does on a workload goes through this trait.
///
/// Implementations open a connection per call, authenticate with the single
/// controller key, and close the connection on every exit path.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` and capture both streams.
    ///
    /// Fails with `Unreachable` if connect/auth fails, `Timeout` if the
    /// command outlives `timeout`, and `CommandFailed` on a non-zero exit.
    async fn execute(
        &self,
        address: Ipv4Addr,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;

    /// Copy a local file to `remote_path` and set its permission bits
    async fn upload_file(
        &self,
        address: Ipv4Addr,
        local_path: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<(), RemoteError>;

    /// Write in-memory content to `remote_path`, replacing any existing file
    async fn write_remote_file(
        &self,
        address: Ipv4Addr,
        remote_path: &str,
        content: &[u8],
    ) -> Result<(), RemoteError>;

    /// Open a pty-backed interactive shell
    async fn open_shell(
        &self,
        address: Ipv4Addr,
        size: TerminalSize,
    ) -> Result<Box<dyn ShellHandle>, RemoteError>;

    /// Generate the controller key pair if absent; return the public key
    async fn ensure_key_pair(&self) -> Result<String, RemoteError>;

    /// List a remote directory, directories first
    async fn list_dir(&self, address: Ipv4Addr, path: &str)
        -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Read a whole remote file
    async fn read_remote_file(&self, address: Ipv4Addr, path: &str)
        -> Result<Vec<u8>, RemoteError>;

    /// Remove a remote file
    async fn remove_remote_file(&self, address: Ipv4Addr, path: &str) -> Result<(), RemoteError>;
}

/// An open interactive terminal on a workload.
///
/// `recv` must be cancel-safe: the console loop races it against a poll
/// deadline and drops the future when nothing arrived.
#[async_trait]
pub trait ShellHandle: Send {
    /// Write bytes to the terminal
    async fn send(&mut self, data: &[u8]) -> Result<(), RemoteError>;

    /// Next chunk of output; `None` once the remote side closed
    async fn recv(&mut self) -> Result<Option<Bytes>, RemoteError>;

    /// Change the terminal geometry
    async fn resize(&mut self, size: TerminalSize) -> Result<(), RemoteError>;

    /// Close the shell and its connection
    async fn close(&mut self) -> Result<(), RemoteError>;
}
