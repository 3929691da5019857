//! Controller state and wiring

use std::sync::Arc;

use gs_core::config::ControllerConfig;
use gs_core::error::GsError;
use gs_core::traits::{ArtifactLookup, Hypervisor, ProxyReloader, RemoteExecutor, WorkloadStore};

use crate::allocator::{NginxReloader, ResourceAllocator, RouteRegistrar};
use crate::artifacts::MojangManifest;
use crate::console::ConsoleMultiplexer;
use crate::hypervisor::ProxmoxClient;
use crate::lifecycle::LifecycleOrchestrator;
use crate::remote::SshManager;
use crate::store::JsonFileStore;

/// External boundaries every component talks through
#[derive(Clone)]
pub struct Backends {
    pub remote: Arc<dyn RemoteExecutor>,
    pub hypervisor: Arc<dyn Hypervisor>,
    pub store: Arc<dyn WorkloadStore>,
    pub artifacts: Arc<dyn ArtifactLookup>,
}

/// Fully wired controller
pub struct ControllerState {
    pub config: ControllerConfig,
    pub backends: Backends,
    pub allocator: Arc<ResourceAllocator>,
    pub routes: Arc<RouteRegistrar>,
    pub lifecycle: Arc<LifecycleOrchestrator>,
    pub console: Arc<ConsoleMultiplexer>,
}

impl ControllerState {
    /// Wire components around the given backends and proxy reloader
    pub fn with_backends(
        config: ControllerConfig,
        backends: Backends,
        reloader: Arc<dyn ProxyReloader>,
    ) -> Result<Self, GsError> {
        let allocator = Arc::new(ResourceAllocator::new(
            &config.network,
            Arc::clone(&backends.hypervisor),
            Arc::clone(&backends.store),
        )?);
        let routes = Arc::new(RouteRegistrar::new(config.proxy.conf_dir.clone(), reloader));
        let lifecycle = Arc::new(LifecycleOrchestrator::new(
            backends.clone(),
            Arc::clone(&allocator),
            Arc::clone(&routes),
            config.provisioning.clone(),
            config.defaults.clone(),
        ));
        let console = Arc::new(ConsoleMultiplexer::new(
            Arc::clone(&lifecycle),
            Arc::clone(&backends.remote),
            config.console.clone(),
        ));

        Ok(Self {
            config,
            backends,
            allocator,
            routes,
            lifecycle,
            console,
        })
    }

    /// Build the production stack: SSH, Proxmox, JSON store, Mojang manifest, nginx
    pub async fn from_config(config: ControllerConfig) -> Result<Self, GsError> {
        let store = JsonFileStore::open(config.store_path.clone()).await?;
        let hypervisor = ProxmoxClient::new(&config.hypervisor)
            .map_err(|e| GsError::Lifecycle(e.into()))?;
        let artifacts = MojangManifest::new(&config.artifacts)
            .map_err(|e| GsError::Lifecycle(e.into()))?;

        let backends = Backends {
            remote: Arc::new(SshManager::new(config.ssh.clone())),
            hypervisor: Arc::new(hypervisor),
            store: Arc::new(store),
            artifacts: Arc::new(artifacts),
        };

        Self::with_backends(config, backends, Arc::new(NginxReloader::new()))
    }
}
