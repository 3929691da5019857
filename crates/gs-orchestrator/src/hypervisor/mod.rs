//! Hypervisor clients

mod proxmox;

pub use proxmox::ProxmoxClient;
