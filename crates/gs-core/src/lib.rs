//! gs-core: Core abstractions and configuration for the game server manager
//!
//! This crate provides the workload data model, the error taxonomy, the
//! controller configuration and the traits that sit at every external
//! boundary (remote execution, hypervisor, storage, artifact lookup, proxy
//! reload). The orchestrator crate implements and consumes them.

pub mod config;
pub mod error;
pub mod shell;
pub mod time;
pub mod traits;
pub mod types;

pub use error::GsError;
pub use types::{Flavor, LiveStatus, Workload, WorkloadId, WorkloadStatus};
