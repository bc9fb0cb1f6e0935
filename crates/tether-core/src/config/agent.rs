//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the tunnel agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// WebSocket URL of the tunnel server, e.g. `wss://host:8443/v3/connect`
    pub server_url: String,

    /// Plaintext token issued for the agent's cluster
    pub token: String,

    /// Node ID when running as a node agent; cluster agent when absent
    pub node: Option<String>,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,

    /// Timeout for establishing the tunnel
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Timeout for local dials requested by the server
    #[serde(with = "duration_secs")]
    pub dial_timeout: Duration,

    /// Networks the server may ask the agent to dial
    pub allowed_networks: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8443/v3/connect".to_string(),
            token: String::new(),
            node: None,
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(15),
            allowed_networks: vec![
                "tcp".to_string(),
                "tcp4".to_string(),
                "tcp6".to_string(),
                "unix".to_string(),
                "npipe".to_string(),
            ],
        }
    }
}

impl AgentConfig {
    pub fn allows_network(&self, network: &str) -> bool {
        self.allowed_networks.iter().any(|n| n == network)
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
