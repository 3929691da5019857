//! Authenticated SSH connections to workloads

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};

use gs_core::error::RemoteError;
use gs_core::traits::CommandOutput;

/// SSH stream extension code for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Client handler for workload connections
pub(crate) struct WorkloadClient {
    address: Ipv4Addr,
}

#[async_trait]
impl client::Handler for WorkloadClient {
    type Error = anyhow::Error;

    /// Containers are created by this controller with fresh host keys,
    /// so there is nothing to pin against.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::trace!(
            "Host key for {}: {}",
            self.address,
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}

/// One authenticated connection. Callers must `close` it on every path.
pub(crate) struct RemoteSession {
    address: Ipv4Addr,
    handle: Handle<WorkloadClient>,
}

impl RemoteSession {
    /// Connect and authenticate within `connect_timeout`
    pub(crate) async fn open(
        address: Ipv4Addr,
        port: u16,
        username: &str,
        key: Arc<KeyPair>,
        connect_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let unreachable = |reason: String| RemoteError::Unreachable { address, reason };

        let ssh_config = Arc::new(client::Config::default());
        let handler = WorkloadClient { address };

        tracing::debug!("Connecting to {}:{}", address, port);
        let connect = async {
            let mut handle = client::connect(ssh_config, SocketAddr::from((address, port)), handler)
                .await
                .map_err(|e| unreachable(format!("connect failed: {}", e)))?;

            let authenticated = handle
                .authenticate_publickey(username, key)
                .await
                .map_err(|e| unreachable(format!("authentication error: {}", e)))?;
            if !authenticated {
                return Err(unreachable(format!("public key rejected for user '{}'", username)));
            }
            Ok(handle)
        };

        let handle = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| unreachable(format!("no answer within {:?}", connect_timeout)))??;

        Ok(Self { address, handle })
    }

    pub(crate) fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub(crate) fn handle(&self) -> &Handle<WorkloadClient> {
        &self.handle
    }

    pub(crate) fn into_handle(self) -> Handle<WorkloadClient> {
        self.handle
    }

    /// Run one command on a fresh channel and capture both streams
    pub(crate) async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Shell(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| RemoteError::Shell(format!("Failed to start command: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        };
        check_exit(output)
    }

    /// Disconnect, logging rather than failing
    pub(crate) async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.address, e);
        }
    }
}

/// Non-zero exit is a failure. Without an exit status, any stderr is.
pub(crate) fn check_exit(output: CommandOutput) -> Result<CommandOutput, RemoteError> {
    let failed = match output.exit_status {
        Some(code) => code != 0,
        None => !output.stderr.trim().is_empty(),
    };

    if failed {
        return Err(RemoteError::CommandFailed {
            exit_status: output.exit_status,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stderr: &str, exit_status: Option<u32>) -> CommandOutput {
        CommandOutput {
            stdout: "out".to_string(),
            stderr: stderr.to_string(),
            exit_status,
        }
    }

    #[test]
    fn test_stderr_with_zero_exit_is_success() {
        let result = check_exit(output("Downloading...\n", Some(0))).unwrap();
        assert_eq!(result.stderr, "Downloading...\n");
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        match check_exit(output("", Some(3))) {
            Err(RemoteError::CommandFailed {
                exit_status, stdout, ..
            }) => {
                assert_eq!(exit_status, Some(3));
                assert_eq!(stdout, "out");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_exit_status_uses_stderr() {
        assert!(check_exit(output("", None)).is_ok());
        assert!(check_exit(output("boom", None)).is_err());
    }
}
