//! Workload record stores

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
