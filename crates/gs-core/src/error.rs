//! Core error types for the game server manager

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{WorkloadId, WorkloadStatus};

/// Top-level error type for the controller
#[derive(Error, Debug)]
pub enum GsError {
    /// Remote execution error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Allocation error
    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    /// Lifecycle error
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Reverse-proxy route error
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the remote execution manager
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    /// Connection or authentication failed
    #[error("Host {address} unreachable: {reason}")]
    Unreachable { address: Ipv4Addr, reason: String },

    /// Command or transfer exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Command ran but reported failure
    #[error("Command exited with status {exit_status:?}: {}", stderr.trim())]
    CommandFailed {
        exit_status: Option<u32>,
        stdout: String,
        stderr: String,
    },

    /// File transfer failed
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Interactive shell could not be opened or broke
    #[error("Shell error: {0}")]
    Shell(String),

    /// Controller key pair could not be created or loaded
    #[error("Key pair error: {0}")]
    KeyPair(String),
}

/// Errors from the hypervisor boundary
#[derive(Error, Debug, Clone)]
pub enum HypervisorError {
    /// Hypervisor connection settings are incomplete
    #[error("Hypervisor connection not configured, missing: {0}")]
    NotConfigured(String),

    /// Request could not be delivered
    #[error("Hypervisor request failed: {0}")]
    Request(String),

    /// Hypervisor answered with an error status
    #[error("Hypervisor rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    /// Response body did not have the expected shape
    #[error("Unexpected hypervisor response: {0}")]
    Decode(String),
}

/// Errors from the workload store
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// No record with this id
    #[error("Workload not found: {0}")]
    NotFound(WorkloadId),

    /// A record with this id already exists
    #[error("Workload already exists: {0}")]
    AlreadyExists(WorkloadId),

    /// Backing file could not be read or written
    #[error("Store I/O error: {0}")]
    Io(String),

    /// Backing file could not be decoded or encoded
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

/// Errors from the artifact lookup boundary
#[derive(Error, Debug, Clone)]
pub enum ArtifactError {
    /// Manifest could not be fetched
    #[error("Manifest request failed: {0}")]
    Request(String),

    /// Requested version is not in the manifest
    #[error("Version '{0}' not found in manifest")]
    UnknownVersion(String),

    /// This flavor has no manifest-based artifact
    #[error("No artifact source for flavor '{0}'")]
    Unsupported(String),
}

/// Errors from the resource allocator
#[derive(Error, Debug)]
pub enum AllocationError {
    /// Every host address at or above the start offset is taken
    #[error("No available addresses in subnet {subnet}")]
    PoolExhausted { subnet: String },

    /// Every container id at or above the floor is taken
    #[error("No container id left at or above {floor}")]
    IdsExhausted { floor: u32 },

    /// Subnet or start address could not be parsed
    #[error("Invalid subnet: {0}")]
    InvalidSubnet(String),

    /// Container scan failed
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    /// Workload store could not be read or written
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from reverse-proxy route registration
#[derive(Error, Debug)]
pub enum RouteError {
    /// Route artifact could not be written or removed
    #[error("Failed to write route file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Proxy refused to reload its configuration
    #[error("Proxy reload failed: {0}")]
    ReloadFailed(String),
}

/// Cause of a failed install step
#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Errors from lifecycle operations
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Unknown workload id
    #[error("Workload not found: {0}")]
    NotFound(WorkloadId),

    /// Container never answered over SSH
    #[error("Container at {address} never became reachable after {attempts} attempts")]
    BootTimeout { address: Ipv4Addr, attempts: u32 },

    /// Install script could not be staged
    #[error("Script upload failed: {0}")]
    UploadFailed(#[source] RemoteError),

    /// Install artifact did not resolve, or the script failed or timed out
    #[error("Install script failed: {0}")]
    InstallFailed(#[source] InstallError),

    /// Service configuration could not be written
    #[error("Could not write service configuration: {0}")]
    ConfigWriteFailed(#[source] RemoteError),

    /// Install artifact could not be resolved
    #[error("Artifact lookup failed: {0}")]
    ArtifactLookup(#[from] ArtifactError),

    /// Runtime operation failed remotely
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Identifier or address allocation failed
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Hypervisor call failed
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    /// Store call failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Operation needs a running workload
    #[error("Workload {id} is {status}, not running")]
    NotRunning { id: WorkloadId, status: WorkloadStatus },

    /// Request was malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<StoreError> for GsError {
    fn from(err: StoreError) -> Self {
        GsError::Lifecycle(LifecycleError::Store(err))
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_message_includes_stderr() {
        let err = RemoteError::CommandFailed {
            exit_status: Some(3),
            stdout: String::new(),
            stderr: "unit not found\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command exited with status Some(3): unit not found"
        );
    }

    #[test]
    fn test_lifecycle_error_wraps_remote() {
        let err: LifecycleError = RemoteError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(err, LifecycleError::Remote(RemoteError::Timeout(_))));
    }
}
