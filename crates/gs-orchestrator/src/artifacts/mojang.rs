//! Mojang version manifest lookup

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use gs_core::config::ArtifactConfig;
use gs_core::error::ArtifactError;
use gs_core::traits::{ArtifactLookup, VersionInfo};
use gs_core::types::Flavor;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Version token that resolves to the newest release
pub const LATEST: &str = "latest";

#[derive(Debug, Deserialize)]
struct Manifest {
    latest: Latest,
    versions: Vec<ManifestVersion>,
}

#[derive(Debug, Deserialize)]
struct Latest {
    release: String,
}

#[derive(Debug, Deserialize)]
struct ManifestVersion {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct VersionPage {
    downloads: Downloads,
}

#[derive(Debug, Deserialize)]
struct Downloads {
    server: Option<Download>,
}

#[derive(Debug, Deserialize)]
struct Download {
    url: String,
}

/// Resolves Java edition versions through the public launcher manifest
pub struct MojangManifest {
    client: Client,
    manifest_url: String,
}

impl MojangManifest {
    pub fn new(config: &ArtifactConfig) -> Result<Self, ArtifactError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ArtifactError::Request(e.to_string()))?;
        Ok(Self {
            client,
            manifest_url: config.manifest_url.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ArtifactError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ArtifactError::Request(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ArtifactError::Request(format!(
                "{}: {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ArtifactError::Request(format!("{}: {}", url, e)))
    }

    async fn manifest(&self) -> Result<Manifest, ArtifactError> {
        self.get_json(&self.manifest_url).await
    }
}

/// Manifest entry for `version`, resolving [`LATEST`] to the newest release
fn resolve<'a>(manifest: &'a Manifest, version: &str) -> Result<&'a ManifestVersion, ArtifactError> {
    let id = if version == LATEST {
        manifest.latest.release.as_str()
    } else {
        version
    };
    manifest
        .versions
        .iter()
        .find(|v| v.id == id)
        .ok_or_else(|| ArtifactError::UnknownVersion(id.to_string()))
}

fn selectable(manifest: Manifest, include_snapshots: bool) -> Vec<VersionInfo> {
    manifest
        .versions
        .into_iter()
        .filter(|v| include_snapshots || v.kind == "release")
        .map(|v| VersionInfo {
            id: v.id,
            kind: v.kind,
        })
        .collect()
}

#[async_trait]
impl ArtifactLookup for MojangManifest {
    async fn download_url(&self, flavor: Flavor, version: &str) -> Result<String, ArtifactError> {
        if !flavor.is_java() {
            return Err(ArtifactError::Unsupported(flavor.to_string()));
        }

        let manifest = self.manifest().await?;
        let entry = resolve(&manifest, version)?;
        tracing::debug!("Resolved {} {} to manifest entry {}", flavor, version, entry.id);

        let page: VersionPage = self.get_json(&entry.url).await?;
        page.downloads
            .server
            .map(|d| d.url)
            .ok_or_else(|| ArtifactError::UnknownVersion(format!("{} (no server download)", entry.id)))
    }

    async fn versions(&self, include_snapshots: bool) -> Result<Vec<VersionInfo>, ArtifactError> {
        Ok(selectable(self.manifest().await?, include_snapshots))
    }
}
