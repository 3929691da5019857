//! Hypervisor boundary

use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HypervisorError;
use crate::types::Resources;

/// A cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub online: bool,
}

/// A container as listed by its node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: u32,
    pub node: String,
    pub name: Option<String>,
    pub status: String,
}

/// Current state of one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    pub status: String,
    pub uptime_secs: Option<u64>,
    pub memory_bytes: Option<u64>,
}

/// Everything needed to create a workload container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub id: u32,
    pub hostname: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Ipv4Addr,
    pub resources: Resources,
    /// Controller public key, trusted by the container for root logins
    pub public_key: String,
}

/// Opaque control surface of the container hypervisor
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// All cluster nodes with their online flag
    async fn nodes(&self) -> Result<Vec<NodeInfo>, HypervisorError>;

    /// Containers hosted on one node
    async fn containers(&self, node: &str) -> Result<Vec<ContainerSummary>, HypervisorError>;

    /// Create and boot a container
    async fn create_container(&self, node: &str, spec: &ContainerSpec)
        -> Result<(), HypervisorError>;

    async fn stop_container(&self, node: &str, id: u32) -> Result<(), HypervisorError>;

    async fn delete_container(&self, node: &str, id: u32) -> Result<(), HypervisorError>;

    async fn container_status(&self, node: &str, id: u32)
        -> Result<ContainerState, HypervisorError>;

    /// Nodes currently online
    async fn online_nodes(&self) -> Result<Vec<NodeInfo>, HypervisorError> {
        Ok(self.nodes().await?.into_iter().filter(|n| n.online).collect())
    }

    /// Ids of every guest the cluster knows about, including guests on
    /// offline nodes. Containers and VMs share one id space.
    async fn all_container_ids(&self) -> Result<Vec<u32>, HypervisorError>;
}
