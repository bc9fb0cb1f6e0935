//! Tunnel server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::token::{hash_token, is_token_digest};

/// Configuration for the tunnel server daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_address: String,

    /// Path agents upgrade on
    pub tunnel_path: String,

    /// Inventory snapshot to load at startup
    pub inventory_path: PathBuf,

    /// Accepted agent tokens
    pub tokens: Vec<TokenEntry>,

    pub timeouts: DialTimeouts,

    /// Interval between heartbeats sent to each agent
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Silence after which an agent session is considered dead
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// API address used when a cluster dial falls back to a node session
    pub loopback_api_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            tunnel_path: "/v3/connect".to_string(),
            inventory_path: super::default_config_dir().join("inventory.toml"),
            tokens: Vec::new(),
            timeouts: DialTimeouts::default(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            loopback_api_address: "127.0.0.1:6443".to_string(),
        }
    }
}

impl ServerConfig {
    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tunnel_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "tunnel_path must start with '/': {}",
                self.tunnel_path
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout must exceed heartbeat_interval".to_string(),
            ));
        }
        if self.timeouts.session_dial.is_zero() || self.timeouts.native_connect.is_zero() {
            return Err(ConfigError::Invalid(
                "dial timeouts must be non-zero".to_string(),
            ));
        }
        if crate::address::split_host_port(&self.loopback_api_address).is_none() {
            return Err(ConfigError::Invalid(format!(
                "loopback_api_address is not host:port: {}",
                self.loopback_api_address
            )));
        }
        for entry in &self.tokens {
            if !is_token_digest(&entry.token_sha256) {
                return Err(ConfigError::Invalid(format!(
                    "token for cluster {} is not a hex SHA-256 digest",
                    entry.cluster
                )));
            }
        }
        Ok(())
    }
}

/// Timeouts applied to outgoing dials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialTimeouts {
    /// Wait for an agent to confirm a tunneled connection
    #[serde(with = "duration_secs")]
    pub session_dial: Duration,

    /// TCP connect timeout for direct dials
    #[serde(with = "duration_secs")]
    pub native_connect: Duration,

    /// TCP keep-alive period for direct dials
    #[serde(with = "duration_secs")]
    pub native_keepalive: Duration,
}

impl Default for DialTimeouts {
    fn default() -> Self {
        Self {
            session_dial: Duration::from_secs(15),
            native_connect: Duration::from_secs(30),
            native_keepalive: Duration::from_secs(30),
        }
    }
}

/// An accepted agent token, stored as a SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub cluster: String,
    pub token_sha256: String,
}

impl TokenEntry {
    /// Build an entry from a plaintext token
    pub fn from_plain(cluster: impl Into<String>, token: &str) -> Self {
        Self {
            cluster: cluster.into(),
            token_sha256: hash_token(token),
        }
    }
}
