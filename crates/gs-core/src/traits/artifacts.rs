//! Artifact lookup boundary

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;
use crate::types::Flavor;

/// A selectable game version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub id: String,
    /// `release`, `snapshot`, ...
    #[serde(rename = "type")]
    pub kind: String,
}

/// Resolves version tokens to installable artifacts
#[async_trait]
pub trait ArtifactLookup: Send + Sync {
    /// Download URL for `version` (`latest` allowed) of `flavor`
    async fn download_url(&self, flavor: Flavor, version: &str) -> Result<String, ArtifactError>;

    /// Known versions, newest first
    async fn versions(&self, include_snapshots: bool) -> Result<Vec<VersionInfo>, ArtifactError>;
}
