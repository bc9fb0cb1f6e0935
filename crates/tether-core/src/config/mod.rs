//! Configuration management for tether

mod agent;
pub mod serde_utils;
mod server;

pub use agent::{AgentConfig, BackoffConfig};
pub use server::{DialTimeouts, ServerConfig, TokenEntry};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
}

/// Default server configuration file path
pub fn default_server_config_path() -> PathBuf {
    default_config_dir().join("server.toml")
}

/// Default agent configuration file path
pub fn default_agent_config_path() -> PathBuf {
    default_config_dir().join("agent.toml")
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
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_server_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("server.toml");

        let mut config = ServerConfig::default();
        config.bind_address = "127.0.0.1:9443".to_string();
        config.tokens.push(TokenEntry::from_plain("c-1", "secret"));
        save_config(&path, &config).unwrap();

        let loaded: ServerConfig = load_config(&path).unwrap();
        assert_eq!(loaded.bind_address, "127.0.0.1:9443");
        assert_eq!(loaded.tokens, config.tokens);
        assert_eq!(loaded.heartbeat_interval, config.heartbeat_interval);
    }

    #[test]
    fn test_load_missing_config() {
        let dir = tempdir().unwrap();
        let err = load_config::<AgentConfig>(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
