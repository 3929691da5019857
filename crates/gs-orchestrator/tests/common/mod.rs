//! Shared fakes for integration tests
//!
//! Each fake records what it was asked to do so tests can assert on the
//! exact sequence of remote and hypervisor operations.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::mpsc;

use gs_core::config::ControllerConfig;
use gs_core::error::{ArtifactError, HypervisorError, RemoteError, RouteError};
use gs_core::traits::{
    ArtifactLookup, CommandOutput, ContainerSpec, ContainerState, ContainerSummary, Hypervisor,
    NodeInfo, ProxyReloader, RemoteEntry, RemoteExecutor, ShellHandle, VersionInfo,
};
use gs_core::types::{Flavor, Resources, TerminalSize, Workload, WorkloadId, WorkloadStatus};
use gs_orchestrator::store::MemoryStore;
use gs_orchestrator::{Backends, ControllerState};

pub const PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFakeKeyForTests gs-test";

/// Scripted remote executor
#[derive(Default)]
pub struct FakeRemote {
    /// (command substring, outcome); first match wins
    rules: Mutex<Vec<(String, Result<CommandOutput, RemoteError>)>>,
    pub commands: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, u32)>>,
    pub writes: Mutex<Vec<(String, Vec<u8>)>>,
    pub removed: Mutex<Vec<String>>,
    pub shells_opened: AtomicUsize,
    pub fail_shell: AtomicBool,
    shell_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    pub shell_input: Arc<Mutex<Vec<Vec<u8>>>>,
    pub shell_resizes: Arc<Mutex<Vec<TerminalSize>>>,
    pub shell_closed: Arc<AtomicBool>,
    /// Shells opened and not yet closed
    pub live_shells: Arc<AtomicUsize>,
    /// Highest `live_shells` ever observed
    pub max_live_shells: Arc<AtomicUsize>,
    /// How long a shell takes to close
    pub close_delay: Mutex<Duration>,
}

impl FakeRemote {
    pub fn respond_when(&self, pattern: &str, outcome: Result<CommandOutput, RemoteError>) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), outcome));
    }

    pub fn fail_when(&self, pattern: &str, error: RemoteError) {
        self.respond_when(pattern, Err(error));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn written(&self, path: &str) -> Option<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, content)| String::from_utf8_lossy(content).into_owned())
    }

    /// Sender feeding the most recently opened shell
    pub fn shell_sender(&self) -> Option<mpsc::UnboundedSender<Bytes>> {
        self.shell_tx.lock().unwrap().clone()
    }

    /// Drop the stored sender so the shell sees end of stream once callers drop theirs
    pub fn close_shell_output(&self) {
        self.shell_tx.lock().unwrap().take();
    }
}

pub fn unreachable(address: Ipv4Addr) -> RemoteError {
    RemoteError::Unreachable {
        address,
        reason: "connection refused".to_string(),
    }
}

pub fn command_failed(stdout: &str, stderr: &str) -> RemoteError {
    RemoteError::CommandFailed {
        exit_status: Some(1),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

pub fn output(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_status: Some(0),
    }
}

#[async_trait]
impl RemoteExecutor for FakeRemote {
    async fn execute(
        &self,
        _address: Ipv4Addr,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        self.commands.lock().unwrap().push(command.to_string());
        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|(pattern, _)| command.contains(pattern.as_str())) {
            Some((_, outcome)) => outcome.clone(),
            None => Ok(output("")),
        }
    }

    async fn upload_file(
        &self,
        _address: Ipv4Addr,
        _local_path: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<(), RemoteError> {
        self.uploads
            .lock()
            .unwrap()
            .push((remote_path.to_string(), mode));
        Ok(())
    }

    async fn write_remote_file(
        &self,
        _address: Ipv4Addr,
        remote_path: &str,
        content: &[u8],
    ) -> Result<(), RemoteError> {
        self.writes
            .lock()
            .unwrap()
            .push((remote_path.to_string(), content.to_vec()));
        Ok(())
    }

    async fn open_shell(
        &self,
        address: Ipv4Addr,
        _size: TerminalSize,
    ) -> Result<Box<dyn ShellHandle>, RemoteError> {
        if self.fail_shell.load(Ordering::SeqCst) {
            return Err(unreachable(address));
        }
        self.shells_opened.fetch_add(1, Ordering::SeqCst);
        let live = self.live_shells.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live_shells.fetch_max(live, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shell_tx.lock().unwrap() = Some(tx);
        Ok(Box::new(FakeShell {
            rx,
            input: Arc::clone(&self.shell_input),
            resizes: Arc::clone(&self.shell_resizes),
            closed: Arc::clone(&self.shell_closed),
            live: Arc::clone(&self.live_shells),
            close_delay: *self.close_delay.lock().unwrap(),
            done: false,
        }))
    }

    async fn ensure_key_pair(&self) -> Result<String, RemoteError> {
        Ok(PUBLIC_KEY.to_string())
    }

    async fn list_dir(&self, _address: Ipv4Addr, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        Ok(vec![RemoteEntry {
            name: "server.properties".to_string(),
            path: format!("{}/server.properties", path),
            is_dir: false,
            size: 42,
        }])
    }

    async fn read_remote_file(&self, _address: Ipv4Addr, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.written(path)
            .map(String::into_bytes)
            .ok_or_else(|| RemoteError::Transfer(format!("{} not found", path)))
    }

    async fn remove_remote_file(&self, _address: Ipv4Addr, path: &str) -> Result<(), RemoteError> {
        self.removed.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

pub struct FakeShell {
    rx: mpsc::UnboundedReceiver<Bytes>,
    input: Arc<Mutex<Vec<Vec<u8>>>>,
    resizes: Arc<Mutex<Vec<TerminalSize>>>,
    closed: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
    close_delay: Duration,
    done: bool,
}

#[async_trait]
impl ShellHandle for FakeShell {
    async fn send(&mut self, data: &[u8]) -> Result<(), RemoteError> {
        self.input.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, RemoteError> {
        Ok(self.rx.recv().await)
    }

    async fn resize(&mut self, size: TerminalSize) -> Result<(), RemoteError> {
        self.resizes.lock().unwrap().push(size);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        if !self.done {
            self.done = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory hypervisor with one or more nodes
pub struct FakeHypervisor {
    pub nodes: Vec<NodeInfo>,
    pub containers: Mutex<Vec<ContainerSummary>>,
    pub created: Mutex<Vec<ContainerSpec>>,
    pub deleted: Mutex<Vec<u32>>,
    pub fail_create: AtomicBool,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeInfo {
                name: "pve1".to_string(),
                online: true,
            }],
            containers: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
        }
    }

    pub fn with_containers(ids: &[u32]) -> Self {
        let hv = Self::new();
        hv.containers.lock().unwrap().extend(ids.iter().map(|id| ContainerSummary {
            id: *id,
            node: "pve1".to_string(),
            name: None,
            status: "running".to_string(),
        }));
        hv
    }

    /// Add an offline node hosting `ids`
    pub fn with_offline_node(self, name: &str, ids: &[u32]) -> Self {
        let mut hv = self;
        hv.nodes.push(NodeInfo {
            name: name.to_string(),
            online: false,
        });
        hv.containers.lock().unwrap().extend(ids.iter().map(|id| ContainerSummary {
            id: *id,
            node: name.to_string(),
            name: None,
            status: "unknown".to_string(),
        }));
        hv
    }

    pub fn container_ids(&self) -> Vec<u32> {
        self.containers.lock().unwrap().iter().map(|c| c.id).collect()
    }

    fn set_status(&self, id: u32, status: &str) -> Result<(), HypervisorError> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| rejected("status", id))?;
        container.status = status.to_string();
        Ok(())
    }
}

fn rejected(operation: &str, id: u32) -> HypervisorError {
    HypervisorError::Rejected {
        operation: operation.to_string(),
        message: format!("CT {} does not exist", id),
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn nodes(&self) -> Result<Vec<NodeInfo>, HypervisorError> {
        Ok(self.nodes.clone())
    }

    async fn containers(&self, node: &str) -> Result<Vec<ContainerSummary>, HypervisorError> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.node == node)
            .cloned()
            .collect())
    }

    async fn create_container(&self, node: &str, spec: &ContainerSpec) -> Result<(), HypervisorError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HypervisorError::Request("storage full".to_string()));
        }
        self.created.lock().unwrap().push(spec.clone());
        self.containers.lock().unwrap().push(ContainerSummary {
            id: spec.id,
            node: node.to_string(),
            name: Some(spec.hostname.clone()),
            status: "running".to_string(),
        });
        Ok(())
    }

    async fn all_container_ids(&self) -> Result<Vec<u32>, HypervisorError> {
        Ok(self.container_ids())
    }

    async fn stop_container(&self, _node: &str, id: u32) -> Result<(), HypervisorError> {
        self.set_status(id, "stopped")
    }

    async fn delete_container(&self, _node: &str, id: u32) -> Result<(), HypervisorError> {
        let mut containers = self.containers.lock().unwrap();
        let before = containers.len();
        containers.retain(|c| c.id != id);
        if containers.len() == before {
            return Err(rejected("delete", id));
        }
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }

    async fn container_status(&self, _node: &str, id: u32) -> Result<ContainerState, HypervisorError> {
        let containers = self.containers.lock().unwrap();
        let container = containers
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| rejected("status", id))?;
        Ok(ContainerState {
            status: container.status.clone(),
            uptime_secs: None,
            memory_bytes: None,
        })
    }
}

/// Java flavors resolve; Bedrock has no source, like the Mojang manifest
#[derive(Default)]
pub struct FakeArtifacts {
    /// Simulate the manifest being unreachable
    pub unavailable: AtomicBool,
}

#[async_trait]
impl ArtifactLookup for FakeArtifacts {
    async fn download_url(&self, flavor: Flavor, version: &str) -> Result<String, ArtifactError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArtifactError::Request("manifest unreachable".to_string()));
        }
        if flavor == Flavor::Bedrock {
            return Err(ArtifactError::Unsupported(flavor.to_string()));
        }
        Ok(format!("https://example.invalid/{}/{}/server.jar", flavor, version))
    }

    async fn versions(&self, _include_snapshots: bool) -> Result<Vec<VersionInfo>, ArtifactError> {
        Ok(vec![VersionInfo {
            id: "1.21.4".to_string(),
            kind: "release".to_string(),
        }])
    }
}

#[derive(Default)]
pub struct CountingReloader {
    pub reloads: AtomicUsize,
}

#[async_trait]
impl ProxyReloader for CountingReloader {
    async fn reload(&self) -> Result<(), RouteError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Controller wired to fakes, with a temporary proxy config directory
pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub hypervisor: Arc<FakeHypervisor>,
    pub store: Arc<MemoryStore>,
    pub reloader: Arc<CountingReloader>,
    pub artifacts: Arc<FakeArtifacts>,
    pub state: ControllerState,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeHypervisor::new(), MemoryStore::new())
    }

    pub fn with(hypervisor: FakeHypervisor, store: MemoryStore) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ControllerConfig::default();
        config.proxy.conf_dir = dir.path().to_path_buf();
        config.provisioning.boot_retry_interval = Duration::from_millis(1);
        config.provisioning.boot_max_attempts = 3;
        config.console.poll_interval = Duration::from_millis(10);
        config.console.read_chunk = 4;

        let remote = Arc::new(FakeRemote::default());
        let hypervisor = Arc::new(hypervisor);
        let store = Arc::new(store);
        let reloader = Arc::new(CountingReloader::default());
        let artifacts = Arc::new(FakeArtifacts::default());

        let backends = Backends {
            remote: remote.clone(),
            hypervisor: hypervisor.clone(),
            store: store.clone(),
            artifacts: artifacts.clone(),
        };
        let state = ControllerState::with_backends(config, backends, reloader.clone()).unwrap();

        Self {
            remote,
            hypervisor,
            store,
            reloader,
            artifacts,
            state,
            dir,
        }
    }

    pub fn route_file(&self, container_id: u32) -> std::path::PathBuf {
        self.dir.path().join(format!("pgsm-{}.conf", container_id))
    }
}

/// A provisioned record, for tests that start from an existing workload
pub fn workload(container_id: u32, address: Ipv4Addr, status: WorkloadStatus) -> Workload {
    let id = WorkloadId::new();
    Workload {
        id,
        name: format!("server-{}", container_id),
        flavor: Flavor::Vanilla,
        game_version: "1.21.4".to_string(),
        container_id,
        node: "pve1".to_string(),
        hostname: Workload::hostname_for(&id, Flavor::Vanilla),
        address,
        resources: Resources {
            disk_gb: 20,
            cores: 2,
            memory_mb: 2048,
        },
        port: 25565,
        extra_ports: vec![],
        settings: BTreeMap::new(),
        status,
        created_at: 0,
        updated_at: 0,
    }
}
