//! Workload lifecycle orchestration
//!
//! Creation reserves an id and address, asks the hypervisor for a container
//! and hands the record to the provisioning pipeline. Runtime operations go
//! through the remote executor and only touch the stored status once the
//! remote side confirmed the change.

pub mod commands;
pub mod flavor;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;

use gs_core::config::{DefaultsConfig, ProvisioningConfig};
use gs_core::error::{ArtifactError, LifecycleError, RemoteError};
use gs_core::time::current_time_millis;
use gs_core::traits::{ContainerSpec, RemoteEntry};
use gs_core::types::{
    Flavor, LiveStatus, Resources, Transition, Workload, WorkloadId, WorkloadStatus,
};

use crate::allocator::{ResourceAllocator, RouteRegistrar};
use crate::state::Backends;

use commands::{CommandSet, ServiceAction, READY_PROBE};

/// Permission bits of the staged install script
const SCRIPT_MODE: u32 = 0o755;

/// Status polls while waiting for a container to stop before deletion
const STOP_POLL_ATTEMPTS: u32 = 12;

/// Default directory for file browsing
pub const DEFAULT_FILES_ROOT: &str = "/PGSM";

/// Parameters for a new workload; unset fields take the configured defaults
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub name: String,
    pub flavor: Option<Flavor>,
    /// `latest` when unset
    pub game_version: Option<String>,
    /// First online node when unset
    pub node: Option<String>,
    pub resources: Option<Resources>,
    pub port: Option<u16>,
    pub extra_ports: Vec<u16>,
    pub settings: BTreeMap<String, String>,
}

/// Drives workloads through their lifecycle
pub struct LifecycleOrchestrator {
    backends: Backends,
    allocator: Arc<ResourceAllocator>,
    routes: Arc<RouteRegistrar>,
    config: ProvisioningConfig,
    defaults: DefaultsConfig,
    commands: CommandSet,
}

impl LifecycleOrchestrator {
    pub fn new(
        backends: Backends,
        allocator: Arc<ResourceAllocator>,
        routes: Arc<RouteRegistrar>,
        config: ProvisioningConfig,
        defaults: DefaultsConfig,
    ) -> Self {
        let commands = CommandSet::new(&config);
        Self {
            backends,
            allocator,
            routes,
            config,
            defaults,
            commands,
        }
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    pub async fn list(&self) -> Result<Vec<Workload>, LifecycleError> {
        Ok(self.backends.store.list().await?)
    }

    /// Fetch a record or fail with `NotFound`
    pub async fn workload(&self, id: &WorkloadId) -> Result<Workload, LifecycleError> {
        self.backends
            .store
            .get(id)
            .await?
            .ok_or(LifecycleError::NotFound(*id))
    }

    /// Apply a transition; illegal ones are logged and leave the record as is
    async fn transition(
        &self,
        id: &WorkloadId,
        transition: Transition,
    ) -> Result<Workload, LifecycleError> {
        match self.backends.store.apply_transition(id, transition).await? {
            Some(updated) => {
                tracing::debug!("Workload {} is now {}", id, updated.status);
                Ok(updated)
            }
            None => {
                let current = self.workload(id).await?;
                tracing::warn!(
                    "Refusing {:?} for workload {} in status {}",
                    transition,
                    id,
                    current.status
                );
                Ok(current)
            }
        }
    }

    /// Record a provisioning failure; the original error is what callers see
    async fn mark_failed(&self, id: &WorkloadId) {
        if let Err(e) = self
            .backends
            .store
            .apply_transition(id, Transition::ProvisionFailed)
            .await
        {
            tracing::error!("Could not mark workload {} as failed: {}", id, e);
        }
    }

    async fn pick_node(&self, requested: Option<String>) -> Result<String, LifecycleError> {
        let online = self.backends.hypervisor.online_nodes().await?;
        match requested {
            Some(node) if online.iter().any(|n| n.name == node) => Ok(node),
            Some(node) => Err(LifecycleError::InvalidRequest(format!(
                "node '{}' is not online",
                node
            ))),
            None => online
                .into_iter()
                .next()
                .map(|n| n.name)
                .ok_or_else(|| LifecycleError::InvalidRequest("no online hypervisor nodes".to_string())),
        }
    }

    /// Reserve resources, commit the record and create the container.
    ///
    /// The returned record is in `creating`; call [`Self::spawn_provision`]
    /// to finish it. A hypervisor failure leaves the record in `error`.
    pub async fn create(&self, request: CreateRequest) -> Result<Workload, LifecycleError> {
        let flavor = request.flavor.unwrap_or(self.defaults.flavor);
        let port = request.port.unwrap_or(self.defaults.port);
        if port == 0 || request.extra_ports.contains(&0) {
            return Err(LifecycleError::InvalidRequest("port 0 is not routable".to_string()));
        }
        flavor::validate_settings(&request.settings).map_err(LifecycleError::InvalidRequest)?;

        let resources = request.resources.unwrap_or(Resources {
            disk_gb: self.defaults.disk_gb,
            cores: self.defaults.cores,
            memory_mb: self.defaults.memory_mb,
        });
        let game_version = request
            .game_version
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| crate::artifacts::LATEST.to_string());

        // Refuse before any container exists if the install could never succeed
        self.check_artifact(flavor, &game_version).await?;

        let node = self.pick_node(request.node).await?;
        let public_key = self.backends.remote.ensure_key_pair().await?;

        let id = WorkloadId::new();
        let hostname = Workload::hostname_for(&id, flavor);
        let name = match request.name.trim() {
            "" => hostname.clone(),
            name => name.to_string(),
        };
        let now = current_time_millis();

        let workload = self
            .allocator
            .reserve(|allocation| Workload {
                id,
                name,
                flavor,
                game_version,
                container_id: allocation.container_id,
                node: node.clone(),
                hostname: hostname.clone(),
                address: allocation.address,
                resources,
                port,
                extra_ports: request.extra_ports,
                settings: request.settings,
                status: WorkloadStatus::Creating,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let spec = ContainerSpec {
            id: workload.container_id,
            hostname,
            address: workload.address,
            prefix_len: self.allocator.subnet().prefix_len(),
            gateway: self.allocator.gateway(),
            resources,
            public_key,
        };

        if let Err(e) = self.backends.hypervisor.create_container(&node, &spec).await {
            tracing::error!("Container creation for workload {} failed: {}", id, e);
            self.mark_failed(&id).await;
            return Err(e.into());
        }

        tracing::info!(
            "Created workload {} ({}) as container {} on {}",
            id,
            workload.name,
            workload.container_id,
            node
        );
        Ok(workload)
    }

    /// Unknown versions and flavors without an artifact source are invalid requests
    async fn check_artifact(&self, flavor: Flavor, version: &str) -> Result<(), LifecycleError> {
        match self.backends.artifacts.download_url(flavor, version).await {
            Ok(_) => Ok(()),
            Err(e @ (ArtifactError::Unsupported(_) | ArtifactError::UnknownVersion(_))) => {
                Err(LifecycleError::InvalidRequest(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run [`Self::provision`] as a background task.
    ///
    /// The join handle carries the outcome; failures are also logged here.
    pub fn spawn_provision(self: &Arc<Self>, id: WorkloadId) -> JoinHandle<Result<(), LifecycleError>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.provision(&id).await;
            if let Err(e) = &result {
                tracing::error!("Provisioning of workload {} failed: {}", id, e);
            }
            result
        })
    }

    /// Turn a freshly created container into a running service.
    ///
    /// Any failure up to and including the config write moves the workload
    /// to `error` and stops the pipeline. Route registration failures are
    /// logged only. A service that will not start leaves it `stopped`.
    pub async fn provision(&self, id: &WorkloadId) -> Result<(), LifecycleError> {
        let workload = self.workload(id).await?;
        if workload.status != WorkloadStatus::Creating {
            return Err(LifecycleError::InvalidRequest(format!(
                "workload {} is {}, only creating workloads can be provisioned",
                id, workload.status
            )));
        }

        if let Err(e) = self.run_install_steps(&workload).await {
            self.mark_failed(id).await;
            return Err(e);
        }

        tracing::info!("Registering routes for workload {}", id);
        if let Err(e) = self.routes.register_route(&workload).await {
            tracing::warn!("Route registration for workload {} failed: {}", id, e);
        }

        tracing::info!("Starting service on workload {}", id);
        let start = self.commands.service(ServiceAction::Start);
        match self
            .backends
            .remote
            .execute(workload.address, &start, self.config.status_timeout)
            .await
        {
            Ok(_) => {
                self.transition(id, Transition::ProvisionSucceeded).await?;
                tracing::info!("Workload {} provisioned and running", id);
            }
            Err(e) => {
                tracing::warn!("Workload {} provisioned but did not start: {}", id, e);
                self.transition(id, Transition::ProvisionedNotStarted).await?;
            }
        }
        Ok(())
    }

    /// Steps 1 to 4: boot wait, upload, install, config write
    async fn run_install_steps(&self, workload: &Workload) -> Result<(), LifecycleError> {
        let id = workload.id;
        let address = workload.address;
        let remote = &self.backends.remote;

        tracing::info!("Waiting for workload {} at {} to accept logins", id, address);
        self.wait_for_boot(address).await?;

        let script = flavor::local_script(&self.config.script_dir, workload.flavor);
        tracing::info!("Uploading {:?} to workload {}", script, id);
        remote
            .upload_file(address, &script, &self.config.staging_path, SCRIPT_MODE)
            .await
            .map_err(LifecycleError::UploadFailed)?;

        let url = self
            .backends
            .artifacts
            .download_url(workload.flavor, &workload.game_version)
            .await
            .map_err(|e| LifecycleError::InstallFailed(e.into()))?;
        let args = flavor::install_args(workload.flavor, &url, &workload.game_version);
        tracing::info!("Running install script on workload {}", id);
        let output = remote
            .execute(address, &self.commands.install(&args), self.config.install_timeout)
            .await
            .map_err(|e| LifecycleError::InstallFailed(e.into()))?;
        tracing::debug!(
            "Install on workload {} finished ({} bytes of output)",
            id,
            output.stdout.len()
        );

        tracing::info!("Writing {} on workload {}", self.config.config_path, id);
        remote
            .write_remote_file(
                address,
                &self.config.config_path,
                flavor::render_properties(workload).as_bytes(),
            )
            .await
            .map_err(LifecycleError::ConfigWriteFailed)?;

        Ok(())
    }

    /// Probe until the container answers, at most `boot_max_attempts` times
    async fn wait_for_boot(&self, address: Ipv4Addr) -> Result<(), LifecycleError> {
        let attempts = self.config.boot_max_attempts;
        for attempt in 1..=attempts {
            match self
                .backends
                .remote
                .execute(address, READY_PROBE, self.config.status_timeout)
                .await
            {
                Ok(_) => {
                    tracing::info!("{} reachable after {} attempt(s)", address, attempt);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("Boot probe {}/{} for {} failed: {}", attempt, attempts, address, e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.boot_retry_interval).await;
            }
        }
        Err(LifecycleError::BootTimeout { address, attempts })
    }

    async fn service_action(
        &self,
        id: &WorkloadId,
        action: ServiceAction,
        transition: Transition,
    ) -> Result<Workload, LifecycleError> {
        let workload = self.workload(id).await?;
        if workload.status == WorkloadStatus::Creating {
            return Err(LifecycleError::InvalidRequest(format!(
                "workload {} is still being provisioned",
                id
            )));
        }

        tracing::info!("{} service on workload {}", action.verb(), id);
        self.backends
            .remote
            .execute(
                workload.address,
                &self.commands.service(action),
                self.config.status_timeout,
            )
            .await?;
        self.transition(id, transition).await
    }

    pub async fn start(&self, id: &WorkloadId) -> Result<Workload, LifecycleError> {
        self.service_action(id, ServiceAction::Start, Transition::Started).await
    }

    pub async fn stop(&self, id: &WorkloadId) -> Result<Workload, LifecycleError> {
        self.service_action(id, ServiceAction::Stop, Transition::Stopped).await
    }

    pub async fn restart(&self, id: &WorkloadId) -> Result<Workload, LifecycleError> {
        self.service_action(id, ServiceAction::Restart, Transition::Restarted).await
    }

    /// Service state as the workload reports it, independent of the record
    pub async fn live_status(&self, id: &WorkloadId) -> Result<LiveStatus, LifecycleError> {
        let workload = self.workload(id).await?;
        let result = self
            .backends
            .remote
            .execute(workload.address, &self.commands.is_active(), self.config.status_timeout)
            .await;

        Ok(match result {
            Ok(output) => LiveStatus::from_unit_state(&output.stdout),
            // `is-active` exits non-zero for every state but active
            Err(RemoteError::CommandFailed { stdout, .. }) => LiveStatus::from_unit_state(&stdout),
            Err(e) => {
                tracing::debug!("Live status of workload {} unavailable: {}", id, e);
                LiveStatus::Unknown
            }
        })
    }

    /// Type a line into the workload's managed terminal session
    pub async fn send_command(&self, id: &WorkloadId, text: &str) -> Result<(), LifecycleError> {
        let workload = self.workload(id).await?;
        tracing::debug!("Sending command to workload {}", id);
        self.backends
            .remote
            .execute(
                workload.address,
                &self.commands.send_keys(text),
                self.config.status_timeout,
            )
            .await?;
        Ok(())
    }

    /// Merge `changes` into the flavor settings and rewrite the remote config.
    ///
    /// The record is updated first; a failed remote write is then reported
    /// as `ConfigWriteFailed`. Workloads still provisioning only get the
    /// record update, the pipeline writes the file later.
    pub async fn update_settings(
        &self,
        id: &WorkloadId,
        changes: BTreeMap<String, String>,
    ) -> Result<Workload, LifecycleError> {
        flavor::validate_settings(&changes).map_err(LifecycleError::InvalidRequest)?;

        let mut settings = self.workload(id).await?.settings;
        settings.extend(changes);
        let updated = self.backends.store.update_settings(id, settings).await?;

        if updated.status == WorkloadStatus::Creating {
            return Ok(updated);
        }

        self.backends
            .remote
            .write_remote_file(
                updated.address,
                &self.config.config_path,
                flavor::render_properties(&updated).as_bytes(),
            )
            .await
            .map_err(LifecycleError::ConfigWriteFailed)?;

        tracing::info!("Updated settings on workload {}", id);
        Ok(updated)
    }

    /// Remove a workload. Only the final record removal can fail.
    pub async fn delete(&self, id: &WorkloadId) -> Result<Workload, LifecycleError> {
        let workload = self.workload(id).await?;
        tracing::info!("Deleting workload {} (container {})", id, workload.container_id);

        if let Err(e) = self
            .backends
            .remote
            .execute(
                workload.address,
                &self.commands.service(ServiceAction::Stop),
                self.config.status_timeout,
            )
            .await
        {
            tracing::warn!("Stopping service on workload {} failed: {}", id, e);
        }

        if let Err(e) = self.routes.deregister_route(&workload).await {
            tracing::warn!("Removing routes for workload {} failed: {}", id, e);
        }

        let hypervisor = &self.backends.hypervisor;
        match hypervisor
            .stop_container(&workload.node, workload.container_id)
            .await
        {
            Ok(()) => self.wait_until_stopped(&workload).await,
            Err(e) => tracing::warn!("Stopping container {} failed: {}", workload.container_id, e),
        }
        if let Err(e) = hypervisor
            .delete_container(&workload.node, workload.container_id)
            .await
        {
            tracing::warn!("Deleting container {} failed: {}", workload.container_id, e);
        }

        self.backends
            .store
            .delete(id)
            .await?
            .ok_or(LifecycleError::NotFound(*id))
    }

    async fn wait_until_stopped(&self, workload: &Workload) {
        for _ in 0..STOP_POLL_ATTEMPTS {
            match self
                .backends
                .hypervisor
                .container_status(&workload.node, workload.container_id)
                .await
            {
                Ok(state) if state.status == "stopped" => return,
                Ok(_) => tokio::time::sleep(self.config.boot_retry_interval).await,
                Err(e) => {
                    tracing::debug!("Status of container {} unavailable: {}", workload.container_id, e);
                    return;
                }
            }
        }
        tracing::warn!(
            "Container {} still not stopped, deleting anyway",
            workload.container_id
        );
    }

    pub async fn list_files(&self, id: &WorkloadId, path: &str) -> Result<Vec<RemoteEntry>, LifecycleError> {
        let workload = self.workload(id).await?;
        Ok(self.backends.remote.list_dir(workload.address, path).await?)
    }

    pub async fn read_file(&self, id: &WorkloadId, path: &str) -> Result<Vec<u8>, LifecycleError> {
        let workload = self.workload(id).await?;
        Ok(self.backends.remote.read_remote_file(workload.address, path).await?)
    }

    /// Copy a local file into the workload without changing its mode
    pub async fn upload_file(
        &self,
        id: &WorkloadId,
        local: &Path,
        remote_path: &str,
    ) -> Result<(), LifecycleError> {
        let workload = self.workload(id).await?;
        let content = tokio::fs::read(local).await.map_err(|e| {
            RemoteError::Transfer(format!("Failed to read local file {:?}: {}", local, e))
        })?;
        self.backends
            .remote
            .write_remote_file(workload.address, remote_path, &content)
            .await?;
        Ok(())
    }

    pub async fn remove_file(&self, id: &WorkloadId, path: &str) -> Result<(), LifecycleError> {
        let workload = self.workload(id).await?;
        Ok(self.backends.remote.remove_remote_file(workload.address, path).await?)
    }
}
