//! Core domain types

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(pub Uuid);

impl WorkloadId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, upper-cased, used in hostnames
    pub fn partial(&self) -> String {
        self.0.simple().to_string()[..8].to_uppercase()
    }
}

impl Default for WorkloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkloadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Persisted lifecycle status of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    /// Container exists, provisioning has not finished
    Creating,
    /// Provisioned, service not running
    Stopped,
    /// Service running
    Running,
    /// Provisioning or a remote action failed
    Error,
}

/// Events that move a workload between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Provisioning finished and the service started
    ProvisionSucceeded,
    /// Provisioning finished but the service did not start
    ProvisionedNotStarted,
    /// A provisioning step failed
    ProvisionFailed,
    /// Explicit start succeeded
    Started,
    /// Explicit stop succeeded
    Stopped,
    /// Explicit restart succeeded
    Restarted,
}

impl WorkloadStatus {
    /// Apply a transition, returning the new status if the edge is legal.
    ///
    /// `creating` only leaves through provisioning outcomes, and nothing
    /// returns to `creating`. `error` only leaves through an explicit
    /// successful start, stop or restart.
    pub fn apply(self, transition: Transition) -> Option<WorkloadStatus> {
        use Transition as T;
        use WorkloadStatus as S;

        match (self, transition) {
            (S::Creating, T::ProvisionSucceeded) => Some(S::Running),
            (S::Creating, T::ProvisionedNotStarted) => Some(S::Stopped),
            (S::Creating, T::ProvisionFailed) => Some(S::Error),
            (S::Creating, _) => None,

            (_, T::ProvisionSucceeded | T::ProvisionedNotStarted | T::ProvisionFailed) => None,

            (_, T::Started | T::Restarted) => Some(S::Running),
            (_, T::Stopped) => Some(S::Stopped),
        }
    }

    /// Check if the edge `self -> next` exists for any transition
    pub fn can_transition_to(self, next: WorkloadStatus) -> bool {
        [
            Transition::ProvisionSucceeded,
            Transition::ProvisionedNotStarted,
            Transition::ProvisionFailed,
            Transition::Started,
            Transition::Stopped,
            Transition::Restarted,
        ]
        .iter()
        .any(|t| self.apply(*t) == Some(next))
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadStatus::Creating => write!(f, "creating"),
            WorkloadStatus::Stopped => write!(f, "stopped"),
            WorkloadStatus::Running => write!(f, "running"),
            WorkloadStatus::Error => write!(f, "error"),
        }
    }
}

/// Service state as reported by the workload itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Running,
    Stopped,
    Error,
    /// Workload could not be reached
    Unknown,
    /// Service manager reported a state outside the mapped vocabulary
    Other(String),
}

impl LiveStatus {
    /// Map `systemctl is-active` output onto the status vocabulary
    pub fn from_unit_state(raw: &str) -> Self {
        match raw.trim() {
            "active" => LiveStatus::Running,
            "inactive" | "deactivating" => LiveStatus::Stopped,
            "failed" => LiveStatus::Error,
            "" => LiveStatus::Unknown,
            other => LiveStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveStatus::Running => write!(f, "running"),
            LiveStatus::Stopped => write!(f, "stopped"),
            LiveStatus::Error => write!(f, "error"),
            LiveStatus::Unknown => write!(f, "unknown"),
            LiveStatus::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Server flavor; selects install script, game code and config format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Vanilla,
    Paper,
    Fabric,
    Forge,
    Bedrock,
}

impl Flavor {
    /// All known flavors
    pub const ALL: [Flavor; 5] = [
        Flavor::Vanilla,
        Flavor::Paper,
        Flavor::Fabric,
        Flavor::Forge,
        Flavor::Bedrock,
    ];

    /// Short flavor tag passed to install scripts
    pub fn tag(&self) -> &'static str {
        match self {
            Flavor::Vanilla => "vanilla",
            Flavor::Paper => "paper",
            Flavor::Fabric => "fabric",
            Flavor::Forge => "forge",
            Flavor::Bedrock => "bedrock",
        }
    }

    /// Game code used in hostnames
    pub fn game_code(&self) -> &'static str {
        match self {
            Flavor::Bedrock => "MCBED",
            _ => "MCJAV",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Flavor::Vanilla => "Minecraft Java - Vanilla",
            Flavor::Paper => "Minecraft Java - Paper",
            Flavor::Fabric => "Minecraft Java - Fabric",
            Flavor::Forge => "Minecraft Java - Forge",
            Flavor::Bedrock => "Minecraft Bedrock",
        }
    }

    /// Whether the service runs on a JVM
    pub fn is_java(&self) -> bool {
        !matches!(self, Flavor::Bedrock)
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flavor::ALL
            .iter()
            .find(|f| f.tag().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("Unknown server type: {}", s))
    }
}

/// Container resources, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub disk_gb: u32,
    pub cores: u32,
    pub memory_mb: u32,
}

/// Terminal geometry for interactive shells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// One managed game server and its container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    pub name: String,
    pub flavor: Flavor,
    /// Version token handed to the artifact lookup (`latest` or an exact id)
    pub game_version: String,

    /// Cluster-unique container identifier
    pub container_id: u32,
    /// Hypervisor node hosting the container
    pub node: String,
    pub hostname: String,
    pub address: Ipv4Addr,

    pub resources: Resources,

    /// Primary service port
    pub port: u16,
    /// Extra ports routed through the proxy
    #[serde(default)]
    pub extra_ports: Vec<u16>,
    /// Flavor-specific settings, written into the service config
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    pub status: WorkloadStatus,
    /// Unix millis
    pub created_at: u64,
    /// Unix millis
    pub updated_at: u64,
}

impl Workload {
    /// Every routed port, primary first, without duplicates
    pub fn ports(&self) -> Vec<u16> {
        let mut ports = vec![self.port];
        for port in &self.extra_ports {
            if !ports.contains(port) {
                ports.push(*port);
            }
        }
        ports
    }

    /// Hostname given to a new container
    pub fn hostname_for(id: &WorkloadId, flavor: Flavor) -> String {
        format!("PGSM-{}-{}", flavor.game_code(), id.partial())
    }
}
