//! gs-orchestrator: LXC game server provisioning and lifecycle control
//!
//! The controller creates containers through the hypervisor API, provisions
//! them over SSH, routes their ports through the reverse proxy, and fans
//! their interactive consoles out to any number of viewers.

pub mod allocator;
pub mod artifacts;
pub mod console;
pub mod hypervisor;
pub mod lifecycle;
pub mod output;
pub mod remote;
pub mod state;
pub mod store;

pub use console::ConsoleMultiplexer;
pub use lifecycle::{CreateRequest, LifecycleOrchestrator};
pub use state::{Backends, ControllerState};
