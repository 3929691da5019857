//! Interactive pty-backed shells

use std::net::Ipv4Addr;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};

use gs_core::error::RemoteError;
use gs_core::traits::ShellHandle;
use gs_core::types::TerminalSize;

use super::session::{RemoteSession, WorkloadClient};

const TERM: &str = "xterm";

/// A shell channel plus the connection that owns it
pub struct SshShell {
    address: Ipv4Addr,
    handle: Handle<WorkloadClient>,
    channel: Channel<Msg>,
    closed: bool,
}

impl SshShell {
    /// Request a pty of `size` and a login shell on `session`
    pub(crate) async fn open(session: RemoteSession, size: TerminalSize) -> Result<Self, RemoteError> {
        let address = session.address();
        let channel = match Self::open_channel(&session, size).await {
            Ok(channel) => channel,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        tracing::debug!("Opened {}x{} shell on {}", size.cols, size.rows, address);
        Ok(Self {
            address,
            handle: session.into_handle(),
            channel,
            closed: false,
        })
    }

    async fn open_channel(
        session: &RemoteSession,
        size: TerminalSize,
    ) -> Result<Channel<Msg>, RemoteError> {
        let channel = session
            .handle()
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Shell(format!("Failed to open channel: {}", e)))?;

        channel
            .request_pty(false, TERM, size.cols as u32, size.rows as u32, 0, 0, &[])
            .await
            .map_err(|e| RemoteError::Shell(format!("Failed to request pty: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| RemoteError::Shell(format!("Failed to start shell: {}", e)))?;

        Ok(channel)
    }
}

#[async_trait]
impl ShellHandle for SshShell {
    async fn send(&mut self, data: &[u8]) -> Result<(), RemoteError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| RemoteError::Shell(format!("Write to {} failed: {}", self.address, e)))
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, RemoteError> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { ref data }) => {
                    return Ok(Some(Bytes::copy_from_slice(data)));
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    return Ok(Some(Bytes::copy_from_slice(data)));
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.closed = true;
                    return Ok(None);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::debug!("Shell on {} exited with {}", self.address, exit_status);
                }
                Some(_) => {}
            }
        }
    }

    async fn resize(&mut self, size: TerminalSize) -> Result<(), RemoteError> {
        self.channel
            .window_change(size.cols as u32, size.rows as u32, 0, 0)
            .await
            .map_err(|e| RemoteError::Shell(format!("Resize failed: {}", e)))
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        let _ = self.channel.eof().await;
        self.closed = true;
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| RemoteError::Shell(format!("Disconnect from {} failed: {}", self.address, e)))
    }
}
