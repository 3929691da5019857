//! Installable artifact lookup

mod mojang;

pub use mojang::{MojangManifest, LATEST};
