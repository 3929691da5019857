//! File transfer over the SFTP subsystem

use russh_sftp::client::fs::Metadata;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;

use gs_core::error::RemoteError;
use gs_core::traits::RemoteEntry;

use super::session::RemoteSession;

fn transfer_err(context: &str, path: &str, e: impl std::fmt::Display) -> RemoteError {
    RemoteError::Transfer(format!("{} {}: {}", context, path, e))
}

/// Start an SFTP client on a new channel of `session`
pub(crate) async fn open(session: &RemoteSession) -> Result<SftpSession, RemoteError> {
    let channel = session
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| RemoteError::Transfer(format!("Failed to open channel: {}", e)))?;

    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| RemoteError::Transfer(format!("SFTP subsystem refused: {}", e)))?;

    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| RemoteError::Transfer(format!("SFTP handshake failed: {}", e)))
}

/// Create or truncate `path` and write `content`
pub(crate) async fn write_file(
    sftp: &SftpSession,
    path: &str,
    content: &[u8],
) -> Result<(), RemoteError> {
    let mut file = sftp
        .create(path)
        .await
        .map_err(|e| transfer_err("Failed to create", path, e))?;
    file.write_all(content)
        .await
        .map_err(|e| transfer_err("Failed to write", path, e))?;
    file.shutdown()
        .await
        .map_err(|e| transfer_err("Failed to flush", path, e))?;
    Ok(())
}

/// Set permission bits with SETSTAT
pub(crate) async fn set_mode(sftp: &SftpSession, path: &str, mode: u32) -> Result<(), RemoteError> {
    let mut attrs = Metadata::empty();
    attrs.permissions = Some(mode);
    sftp.set_metadata(path, attrs)
        .await
        .map_err(|e| transfer_err("Failed to set mode on", path, e))
}

pub(crate) async fn read_file(sftp: &SftpSession, path: &str) -> Result<Vec<u8>, RemoteError> {
    sftp.read(path)
        .await
        .map_err(|e| transfer_err("Failed to read", path, e))
}

pub(crate) async fn remove_file(sftp: &SftpSession, path: &str) -> Result<(), RemoteError> {
    sftp.remove_file(path)
        .await
        .map_err(|e| transfer_err("Failed to remove", path, e))
}

/// Directory listing, directories first, then by case-insensitive name
pub(crate) async fn list_dir(sftp: &SftpSession, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
    let dir = sftp
        .read_dir(path)
        .await
        .map_err(|e| transfer_err("Failed to list", path, e))?;

    let mut entries: Vec<RemoteEntry> = dir
        .filter(|entry| {
            let name = entry.file_name();
            name != "." && name != ".."
        })
        .map(|entry| {
            let name = entry.file_name();
            let metadata = entry.metadata();
            RemoteEntry {
                path: join_remote(path, &name),
                is_dir: entry.file_type().is_dir(),
                size: metadata.size.unwrap_or(0),
                name,
            }
        })
        .collect();

    sort_entries(&mut entries);
    Ok(entries)
}

pub(crate) fn sort_entries(entries: &mut [RemoteEntry]) {
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

/// Join a remote directory and a child name with exactly one slash
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
