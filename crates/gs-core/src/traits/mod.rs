//! Core trait definitions for every external boundary

mod artifacts;
mod hypervisor;
mod proxy;
mod remote;
mod store;

pub use artifacts::{ArtifactLookup, VersionInfo};
pub use hypervisor::{ContainerSpec, ContainerState, ContainerSummary, Hypervisor, NodeInfo};
pub use proxy::ProxyReloader;
pub use remote::{CommandOutput, RemoteEntry, RemoteExecutor, ShellHandle};
pub use store::WorkloadStore;
