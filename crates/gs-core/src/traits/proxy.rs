//! Reverse-proxy reload sink

use async_trait::async_trait;

use crate::error::RouteError;

/// Triggers the reverse proxy to re-read its configuration
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self) -> Result<(), RouteError>;
}
