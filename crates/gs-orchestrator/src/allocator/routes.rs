//! Reverse-proxy route registration
//!
//! Each workload gets one nginx stream config file holding an upstream and a
//! server block per routed port. The proxy's `nginx.conf` must include the
//! config directory from inside its `stream {}` context.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use gs_core::error::RouteError;
use gs_core::traits::ProxyReloader;
use gs_core::types::Workload;

/// Writes and removes per-workload route files
pub struct RouteRegistrar {
    conf_dir: PathBuf,
    reloader: Arc<dyn ProxyReloader>,
}

impl RouteRegistrar {
    pub fn new(conf_dir: impl Into<PathBuf>, reloader: Arc<dyn ProxyReloader>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            reloader,
        }
    }

    /// Route file for a container
    pub fn conf_path(&self, container_id: u32) -> PathBuf {
        self.conf_dir.join(format!("pgsm-{}.conf", container_id))
    }

    /// Write the route file and reload the proxy.
    ///
    /// A reload failure is returned after the file was written.
    pub async fn register_route(&self, workload: &Workload) -> Result<(), RouteError> {
        let path = self.conf_path(workload.container_id);
        tokio::fs::create_dir_all(&self.conf_dir)
            .await
            .map_err(|source| RouteError::Write {
                path: self.conf_dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, render_routes(workload))
            .await
            .map_err(|source| RouteError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::info!(
            "Wrote route {:?} for workload {} ({} ports)",
            path,
            workload.id,
            workload.ports().len()
        );
        self.reloader.reload().await
    }

    /// Remove the route file and reload if there was one.
    ///
    /// Returns whether a file was removed.
    pub async fn deregister_route(&self, workload: &Workload) -> Result<bool, RouteError> {
        let path = self.conf_path(workload.container_id);
        if !path_exists(&path).await {
            return Ok(false);
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|source| RouteError::Write {
                path: path.clone(),
                source,
            })?;
        tracing::info!("Removed route {:?} for workload {}", path, workload.id);

        self.reloader.reload().await?;
        Ok(true)
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Upstream name for one routed port; the primary keeps the short form
fn upstream_name(workload: &Workload, port: u16) -> String {
    if port == workload.port {
        format!("pgsm_{}", workload.container_id)
    } else {
        format!("pgsm_{}_{}", workload.container_id, port)
    }
}

/// nginx stream config forwarding each port to the same port on the workload
pub fn render_routes(workload: &Workload) -> String {
    let mut out = format!(
        "# PGSM Auto-generated: {} (CT {})\n",
        workload.name, workload.container_id
    );
    for port in workload.ports() {
        let upstream = upstream_name(workload, port);
        let _ = write!(
            out,
            "upstream {upstream} {{\n    server {address}:{port};\n}}\n\
             server {{\n    listen {port};\n    proxy_pass {upstream};\n}}\n",
            upstream = upstream,
            address = workload.address,
            port = port,
        );
    }
    out
}

/// Reloads nginx, retrying through sudo when the direct call is refused
pub struct NginxReloader {
    program: String,
}

impl NginxReloader {
    pub fn new() -> Self {
        Self {
            program: "nginx".to_string(),
        }
    }
}

impl Default for NginxReloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyReloader for NginxReloader {
    async fn reload(&self) -> Result<(), RouteError> {
        let attempts: [(&str, Vec<&str>); 2] = [
            (self.program.as_str(), vec!["-s", "reload"]),
            ("sudo", vec![self.program.as_str(), "-s", "reload"]),
        ];

        let mut last_error = String::new();
        for (program, args) in attempts {
            match tokio::process::Command::new(program).args(&args).output().await {
                Ok(output) if output.status.success() => {
                    tracing::debug!("Proxy reloaded via {}", program);
                    return Ok(());
                }
                Ok(output) => {
                    last_error = String::from_utf8_lossy(&output.stderr).trim().to_string();
                }
                Err(e) => {
                    last_error = format!("failed to run {}: {}", program, e);
                }
            }
        }

        Err(RouteError::ReloadFailed(last_error))
    }
}
