//! Proxmox VE REST client
//!
//! Authenticates with a username/password ticket, cached for the lifetime of
//! the client. Mutating calls carry the CSRF token that came with the ticket.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use gs_core::config::HypervisorConfig;
use gs_core::error::HypervisorError;
use gs_core::traits::{ContainerSpec, ContainerState, ContainerSummary, Hypervisor, NodeInfo};

/// Deadline for a single API request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxmox wraps every payload in `{"data": ...}`
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct Ticket {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Deserialize)]
struct RawNode {
    node: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct RawContainer {
    /// Some API versions return the id as a string
    vmid: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: String,
}

/// Entry of `/cluster/resources?type=vm`
#[derive(Deserialize)]
struct RawResource {
    #[serde(default)]
    vmid: Option<Value>,
    #[serde(default)]
    node: String,
}

#[derive(Deserialize)]
struct RawStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    uptime: Option<u64>,
    #[serde(default)]
    mem: Option<u64>,
}

fn parse_vmid(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Guest ids from the cluster resource index; entries without an id are skipped
fn resource_ids(resources: Vec<RawResource>) -> Vec<u32> {
    resources
        .into_iter()
        .filter_map(|r| match r.vmid.as_ref().and_then(parse_vmid) {
            Some(id) => Some(id),
            None => {
                tracing::warn!("Ignoring cluster resource without vmid on {}", r.node);
                None
            }
        })
        .collect()
}

/// Hypervisor implementation backed by the Proxmox VE API
pub struct ProxmoxClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    config: HypervisorConfig,
    ticket: RwLock<Option<Ticket>>,
}

impl ProxmoxClient {
    /// Build a client; fails if host or credentials are missing
    pub fn new(config: &HypervisorConfig) -> Result<Self, HypervisorError> {
        let missing: Vec<&str> = [
            ("host", config.host.is_none()),
            ("username", config.username.is_none()),
            ("password", config.password.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(HypervisorError::NotConfigured(missing.join(", ")));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| HypervisorError::Request(e.to_string()))?;

        let host = config.host.clone().unwrap_or_default();
        Ok(Self {
            client,
            base_url: format!("https://{}:{}/api2/json", host, config.port),
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
            config: config.clone(),
            ticket: RwLock::new(None),
        })
    }

    async fn login(&self) -> Result<(), HypervisorError> {
        if self.ticket.read().await.is_some() {
            return Ok(());
        }

        let mut slot = self.ticket.write().await;
        if slot.is_some() {
            return Ok(());
        }

        tracing::debug!("Requesting Proxmox ticket for {}", self.username);
        let response = self
            .client
            .post(format!("{}/access/ticket", self.base_url))
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|e| HypervisorError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HypervisorError::Rejected {
                operation: "login".to_string(),
                message: response.status().to_string(),
            });
        }

        let envelope: Envelope<Ticket> = response
            .json()
            .await
            .map_err(|e| HypervisorError::Decode(e.to_string()))?;
        *slot = Some(envelope.data);
        Ok(())
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, HypervisorError> {
        self.login().await?;
        let guard = self.ticket.read().await;
        let ticket = guard
            .as_ref()
            .ok_or_else(|| HypervisorError::Request("no ticket after login".to_string()))?;

        let mut builder = self
            .client
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .header("Cookie", format!("PVEAuthCookie={}", ticket.ticket));
        if method != Method::GET {
            builder = builder.header("CSRFPreventionToken", &ticket.csrf_token);
        }
        Ok(builder)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<T, HypervisorError> {
        let response = builder
            .send()
            .await
            .map_err(|e| HypervisorError::Request(format!("{}: {}", operation, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Ticket expired; the next call logs in again.
            *self.ticket.write().await = None;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HypervisorError::Rejected {
                operation: operation.to_string(),
                message: format!("{} {}", status, body.trim()),
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| HypervisorError::Decode(format!("{}: {}", operation, e)))?;
        Ok(envelope.data)
    }

    /// Form body for container creation
    fn create_params(&self, spec: &ContainerSpec) -> Vec<(&'static str, String)> {
        vec![
            ("vmid", spec.id.to_string()),
            ("ostemplate", self.config.template.clone()),
            ("hostname", spec.hostname.clone()),
            ("unprivileged", "1".to_string()),
            ("cores", spec.resources.cores.to_string()),
            ("memory", spec.resources.memory_mb.to_string()),
            (
                "rootfs",
                format!("{}:{}", self.config.storage, spec.resources.disk_gb),
            ),
            (
                "net0",
                format!(
                    "name=eth0,bridge={},ip={}/{},gw={}",
                    self.config.bridge, spec.address, spec.prefix_len, spec.gateway
                ),
            ),
            ("nameserver", self.config.nameserver.clone()),
            ("searchdomain", self.config.search_domain.clone()),
            ("ssh-public-keys", spec.public_key.clone()),
            ("features", "nesting=1".to_string()),
            ("start", "1".to_string()),
        ]
    }
}

#[async_trait]
impl Hypervisor for ProxmoxClient {
    async fn nodes(&self) -> Result<Vec<NodeInfo>, HypervisorError> {
        let builder = self.request(Method::GET, "/nodes").await?;
        let raw: Vec<RawNode> = self.send("list nodes", builder).await?;
        Ok(raw
            .into_iter()
            .map(|n| NodeInfo {
                online: n.status == "online",
                name: n.node,
            })
            .collect())
    }

    async fn containers(&self, node: &str) -> Result<Vec<ContainerSummary>, HypervisorError> {
        let builder = self
            .request(Method::GET, &format!("/nodes/{}/lxc", node))
            .await?;
        let raw: Vec<RawContainer> = self.send("list containers", builder).await?;

        let mut containers = Vec::with_capacity(raw.len());
        for c in raw {
            let Some(id) = parse_vmid(&c.vmid) else {
                tracing::warn!("Ignoring container with unparseable vmid {} on {}", c.vmid, node);
                continue;
            };
            containers.push(ContainerSummary {
                id,
                node: node.to_string(),
                name: c.name,
                status: c.status,
            });
        }
        Ok(containers)
    }

    /// Read from the cluster index, which still lists guests of offline nodes
    async fn all_container_ids(&self) -> Result<Vec<u32>, HypervisorError> {
        let builder = self
            .request(Method::GET, "/cluster/resources")
            .await?
            .query(&[("type", "vm")]);
        let raw: Vec<RawResource> = self.send("list cluster resources", builder).await?;
        Ok(resource_ids(raw))
    }

    async fn create_container(
        &self,
        node: &str,
        spec: &ContainerSpec,
    ) -> Result<(), HypervisorError> {
        tracing::info!(
            "Creating container {} ({}) on {} at {}",
            spec.id,
            spec.hostname,
            node,
            spec.address
        );
        let builder = self
            .request(Method::POST, &format!("/nodes/{}/lxc", node))
            .await?
            .form(&self.create_params(spec));
        let _task: Value = self.send("create container", builder).await?;
        Ok(())
    }

    async fn stop_container(&self, node: &str, id: u32) -> Result<(), HypervisorError> {
        let builder = self
            .request(Method::POST, &format!("/nodes/{}/lxc/{}/status/stop", node, id))
            .await?;
        let _task: Value = self.send("stop container", builder).await?;
        Ok(())
    }

    async fn delete_container(&self, node: &str, id: u32) -> Result<(), HypervisorError> {
        let builder = self
            .request(Method::DELETE, &format!("/nodes/{}/lxc/{}", node, id))
            .await?;
        let _task: Value = self.send("delete container", builder).await?;
        Ok(())
    }

    async fn container_status(&self, node: &str, id: u32) -> Result<ContainerState, HypervisorError> {
        let builder = self
            .request(Method::GET, &format!("/nodes/{}/lxc/{}/status/current", node, id))
            .await?;
        let raw: RawStatus = self.send("container status", builder).await?;
        Ok(ContainerState {
            status: raw.status,
            uptime_secs: raw.uptime,
            memory_bytes: raw.mem,
        })
    }
}
