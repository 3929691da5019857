//! Controller key pair management
//!
//! One key pair authenticates the controller against every workload. The
//! private key is written once in OpenSSH format with owner-only permissions;
//! the public key sits next to it with a `.pub` suffix.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use gs_core::error::RemoteError;
use rand::rngs::OsRng;
use ssh_key::private::{KeypairData, RsaKeypair};
use ssh_key::{Algorithm, LineEnding, PrivateKey};

/// Modulus size of the controller key
pub const CONTROLLER_KEY_BITS: usize = 4096;

const KEY_COMMENT: &str = "pgsm-controller";

/// Key algorithms the controller can generate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa { bits: usize },
    Ed25519,
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        KeyAlgorithm::Rsa {
            bits: CONTROLLER_KEY_BITS,
        }
    }
}

/// Path of the public half for a private key path
pub fn public_key_path(private_path: &Path) -> PathBuf {
    let mut name = private_path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// Ensure a key pair exists at `path` and return the OpenSSH public key.
///
/// An existing private key is never replaced and the returned public key is
/// always derived from the private key on disk. A new private key is staged
/// next to `path` and hard-linked into place, which fails if another caller
/// won the race; the loser then returns the winner's key.
pub async fn ensure_key_pair(path: &Path, algorithm: KeyAlgorithm) -> Result<String, RemoteError> {
    if let Some(public) = read_existing(path).await? {
        tracing::debug!("Using existing key pair at {:?}", path);
        return Ok(public);
    }

    tracing::info!("Generating new {:?} key pair at {:?}", algorithm, path);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            RemoteError::KeyPair(format!("Failed to create directory {:?}: {}", parent, e))
        })?;
    }

    // Generation is CPU-bound; keep it off the runtime threads.
    let target = path.to_path_buf();
    let installed = tokio::task::spawn_blocking(move || {
        let private = generate(algorithm)?;
        install_private(&target, &private).map(|installed| installed.then_some(private))
    })
    .await
    .map_err(|e| RemoteError::KeyPair(format!("Key generation task failed: {}", e)))??;

    match installed {
        Some(private) => {
            let public = encode_public(&private)?;
            write_public(&public_key_path(path), &public).await?;
            tracing::info!("Controller key pair generated");
            Ok(public)
        }
        None => {
            tracing::debug!("Key pair at {:?} was created concurrently", path);
            read_existing(path).await?.ok_or_else(|| {
                RemoteError::KeyPair(format!("Key at {:?} vanished after creation", path))
            })
        }
    }
}

/// Public key of the private key at `path`, rewriting a missing or stale `.pub`
async fn read_existing(path: &Path) -> Result<Option<String>, RemoteError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RemoteError::KeyPair(format!("Failed to read {:?}: {}", path, e)));
        }
    };
    let private = PrivateKey::from_openssh(&content)
        .map_err(|e| RemoteError::KeyPair(format!("Failed to parse {:?}: {}", path, e)))?;
    let public = encode_public(&private)?;

    let pub_path = public_key_path(path);
    let current = tokio::fs::read_to_string(&pub_path).await.unwrap_or_default();
    if current.trim() != public {
        tracing::info!("Writing public key {:?}", pub_path);
        write_public(&pub_path, &public).await?;
    }
    Ok(Some(public))
}

/// Move a new private key into place unless one already exists.
///
/// Returns `false` when `path` was taken by someone else.
fn install_private(path: &Path, private: &PrivateKey) -> Result<bool, RemoteError> {
    let encoded = private
        .to_openssh(LineEnding::LF)
        .map_err(|e| RemoteError::KeyPair(format!("Failed to encode private key: {}", e)))?;

    let staging = staging_path(path);
    write_owner_only(&staging, encoded.as_bytes())?;
    let linked = std::fs::hard_link(&staging, path);
    if let Err(e) = std::fs::remove_file(&staging) {
        tracing::warn!("Could not remove staged key {:?}: {}", staging, e);
    }

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(RemoteError::KeyPair(format!("Failed to install {:?}: {}", path, e))),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{:08x}.tmp", rand::random::<u32>()));
    PathBuf::from(name)
}

fn write_owner_only(path: &Path, content: &[u8]) -> Result<(), RemoteError> {
    let fail = |e: std::io::Error| RemoteError::KeyPair(format!("Failed to write {:?}: {}", path, e));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(fail)?;
    file.write_all(content).map_err(fail)?;
    file.sync_all().map_err(fail)?;
    restrict_permissions(path)
}

fn generate(algorithm: KeyAlgorithm) -> Result<PrivateKey, RemoteError> {
    let mut private = match algorithm {
        KeyAlgorithm::Rsa { bits } => {
            let keypair = RsaKeypair::random(&mut OsRng, bits)
                .map_err(|e| RemoteError::KeyPair(format!("RSA generation failed: {}", e)))?;
            PrivateKey::new(KeypairData::from(keypair), KEY_COMMENT)
                .map_err(|e| RemoteError::KeyPair(e.to_string()))?
        }
        KeyAlgorithm::Ed25519 => PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .map_err(|e| RemoteError::KeyPair(format!("Ed25519 generation failed: {}", e)))?,
    };
    private.set_comment(KEY_COMMENT);
    Ok(private)
}

fn encode_public(private: &PrivateKey) -> Result<String, RemoteError> {
    private
        .public_key()
        .to_openssh()
        .map_err(|e| RemoteError::KeyPair(format!("Failed to encode public key: {}", e)))
}

async fn write_public(path: &Path, public: &str) -> Result<(), RemoteError> {
    tokio::fs::write(path, format!("{}\n", public))
        .await
        .map_err(|e| RemoteError::KeyPair(format!("Failed to write {:?}: {}", path, e)))
}

fn restrict_permissions(path: &Path) -> Result<(), RemoteError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, permissions)
            .map_err(|e| RemoteError::KeyPair(format!("Failed to restrict {:?}: {}", path, e)))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_public_key_path_appends_suffix() {
        assert_eq!(
            public_key_path(Path::new("/etc/pgsm/keys/pgsm_rsa")),
            PathBuf::from("/etc/pgsm/keys/pgsm_rsa.pub")
        );
    }

    #[tokio::test]
    async fn test_derives_missing_public_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id");

        let first = ensure_key_pair(&path, KeyAlgorithm::Ed25519).await.unwrap();
        std::fs::remove_file(public_key_path(&path)).unwrap();

        let second = ensure_key_pair(&path, KeyAlgorithm::Ed25519).await.unwrap();
        assert_eq!(first, second);
        assert!(public_key_path(&path).exists());
    }

    #[test]
    fn test_install_keeps_existing_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id");
        std::fs::write(&path, "taken").unwrap();

        let private = generate(KeyAlgorithm::Ed25519).unwrap();
        assert!(!install_private(&path, &private).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "taken");
        // the staged copy is gone
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_stale_public_key_is_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id");

        let public = ensure_key_pair(&path, KeyAlgorithm::Ed25519).await.unwrap();
        std::fs::write(public_key_path(&path), "ssh-ed25519 AAAA stale\n").unwrap();

        assert_eq!(ensure_key_pair(&path, KeyAlgorithm::Ed25519).await.unwrap(), public);
        assert_eq!(
            std::fs::read_to_string(public_key_path(&path)).unwrap().trim(),
            public
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("id");
        ensure_key_pair(&path, KeyAlgorithm::Ed25519).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
