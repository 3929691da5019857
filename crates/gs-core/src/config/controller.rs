//! Controller configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::types::Flavor;

/// Top-level configuration for the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Path of the JSON workload store
    pub store_path: PathBuf,
    /// Hypervisor API connection
    pub hypervisor: HypervisorConfig,
    /// Managed subnet
    pub network: NetworkConfig,
    /// SSH access to workloads
    pub ssh: SshConfig,
    /// Provisioning pipeline
    pub provisioning: ProvisioningConfig,
    /// Reverse proxy
    pub proxy: ProxyConfig,
    /// Version manifest
    pub artifacts: ArtifactConfig,
    /// Console streaming
    pub console: ConsoleConfig,
    /// Defaults for new workloads
    pub defaults: DefaultsConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            store_path: super::default_config_dir().join("workloads.json"),
            hypervisor: HypervisorConfig::default(),
            network: NetworkConfig::default(),
            ssh: SshConfig::default(),
            provisioning: ProvisioningConfig::default(),
            proxy: ProxyConfig::default(),
            artifacts: ArtifactConfig::default(),
            console: ConsoleConfig::default(),
            defaults: DefaultsConfig::default(),
        }
    }
}

/// Hypervisor connection and container template settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// API host name or address
    pub host: Option<String>,
    /// API port
    pub port: u16,
    /// Login user, e.g. `root@pam`
    pub username: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Verify the API's TLS certificate
    pub verify_tls: bool,
    /// Container template volume
    pub template: String,
    /// Storage pool for container root filesystems
    pub storage: String,
    /// Bridge the container NIC is attached to
    pub bridge: String,
    /// DNS server for containers
    pub nameserver: String,
    /// DNS search domain for containers
    pub search_domain: String,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 8006,
            username: None,
            password: None,
            verify_tls: false,
            template: "kestrel:vztmpl/debian-13-standard_13.1-2_amd64.tar.zst".to_string(),
            storage: "kestrel".to_string(),
            bridge: "PGSM".to_string(),
            nameserver: "1.1.1.1".to_string(),
            search_domain: "PGSM.lan".to_string(),
        }
    }
}

/// Managed subnet for workload addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Subnet in CIDR notation
    pub subnet: String,
    /// First address handed to workloads; lower ones are reserved for infrastructure
    pub ip_start: String,
    /// Default gateway for containers
    pub gateway: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            subnet: "172.16.0.0/24".to_string(),
            ip_start: "172.16.0.10".to_string(),
            gateway: "172.16.0.1".to_string(),
        }
    }
}

/// SSH key and connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Private key path; the public key lives next to it with a `.pub` suffix
    pub key_path: PathBuf,
    /// Remote user
    pub username: String,
    /// SSH port on every workload
    pub port: u16,
    /// Deadline for connect + authenticate
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Default deadline for a command
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            key_path: super::default_config_dir().join("keys").join("pgsm_rsa"),
            username: "root".to_string(),
            port: 22,
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Provisioning pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Delay between reachability probes
    #[serde(with = "duration_secs")]
    pub boot_retry_interval: Duration,
    /// Reachability probes before giving up
    pub boot_max_attempts: u32,
    /// Deadline for the install script
    #[serde(with = "duration_secs")]
    pub install_timeout: Duration,
    /// Deadline for status and service-control commands
    #[serde(with = "duration_secs")]
    pub status_timeout: Duration,
    /// Local directory holding the install scripts
    pub script_dir: PathBuf,
    /// Remote path the install script is staged at
    pub staging_path: String,
    /// Remote path of the generated service configuration
    pub config_path: String,
    /// systemd unit created by the install scripts
    pub service_unit: String,
    /// User that owns the terminal multiplexer session
    pub service_user: String,
    /// Name of the terminal multiplexer session
    pub terminal_session: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            boot_retry_interval: Duration::from_secs(5),
            boot_max_attempts: 60,
            install_timeout: Duration::from_secs(600),
            status_timeout: Duration::from_secs(15),
            script_dir: PathBuf::from("Scripts"),
            staging_path: "/tmp/pgsm_install.sh".to_string(),
            config_path: "/PGSM/server.properties".to_string(),
            service_unit: "PGSM".to_string(),
            service_user: "PGSM".to_string(),
            terminal_session: "PGSM".to_string(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Directory the proxy includes stream configs from
    pub conf_dir: PathBuf,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/nginx/conf.d"),
        }
    }
}

/// Version manifest settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub manifest_url: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            manifest_url: "https://piston-meta.mojang.com/mc/game/version_manifest.json"
                .to_string(),
        }
    }
}

/// Console streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Sleep between shell polls when no output is ready
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Maximum bytes read per poll
    pub read_chunk: usize,
    /// Default shell width
    pub cols: u16,
    /// Default shell height
    pub rows: u16,
    /// Per-viewer output buffer, in chunks
    pub viewer_buffer: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            read_chunk: 4096,
            cols: 220,
            rows: 50,
            viewer_buffer: 256,
        }
    }
}

/// Defaults for new workloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub disk_gb: u32,
    pub cores: u32,
    pub memory_mb: u32,
    pub port: u16,
    pub flavor: Flavor,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            disk_gb: 20,
            cores: 8,
            memory_mb: 4096,
            port: 25565,
            flavor: Flavor::Vanilla,
        }
    }
}
