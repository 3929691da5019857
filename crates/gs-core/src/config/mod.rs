//! Configuration management for the controller

mod controller;
pub mod serde_utils;

pub use controller::{
    ArtifactConfig, ConsoleConfig, ControllerConfig, DefaultsConfig, HypervisorConfig,
    NetworkConfig, ProvisioningConfig, ProxyConfig, SshConfig,
};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("game-server-manager")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config::<ControllerConfig>(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ControllerConfig::default();
        config.hypervisor.host = Some("pve.lan".to_string());
        config.network.ip_start = "172.16.0.50".to_string();
        save_config(&path, &config).unwrap();

        let loaded: ControllerConfig = load_config(&path).unwrap();
        assert_eq!(loaded.hypervisor.host.as_deref(), Some("pve.lan"));
        assert_eq!(loaded.network.ip_start, "172.16.0.50");
        assert_eq!(loaded.provisioning.boot_max_attempts, 60);
    }
}
