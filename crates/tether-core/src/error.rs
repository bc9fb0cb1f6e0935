//! Error types for tether

use std::path::PathBuf;
use std::time::Duration;

use http::StatusCode;
use tether_protocol::ProtocolError;
use thiserror::Error;

use crate::types::{ClusterId, NodeId, SessionKey};

/// Top-level error type for the tether crates
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Dial error: {0}")]
    Dial(#[from] DialError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures surfaced by a dialer.
///
/// Every failure of a dial is returned to the caller; nothing is retried
/// or swallowed inside the dialer.
#[derive(Error, Debug)]
pub enum DialError {
    /// The inventory has no such cluster
    #[error("Unknown cluster: {0}")]
    UnknownCluster(ClusterId),

    /// The inventory has no such node
    #[error("Unknown node: {cluster}/{node}")]
    UnknownNode { cluster: ClusterId, node: NodeId },

    /// No cluster session and no usable node fallback
    #[error("Waiting for cluster agent to connect: {0}")]
    AgentNotReady(ClusterId),

    /// Node-targeted dial without a session for that node
    #[error("No agent session for node {0}")]
    NoNodeSession(SessionKey),

    /// Session key absent from the registry at dial time
    #[error("No session registered under {0}")]
    NoSession(SessionKey),

    /// The session closed or was replaced while the dial was in flight
    #[error("Session {0} went away during dial")]
    SessionGone(SessionKey),

    /// Session acquisition or connect exceeded its deadline
    #[error("Dial to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// The caller cancelled the dial
    #[error("Dial cancelled")]
    Cancelled,

    /// The far end refused or failed the connect
    #[error("Connect to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// The target cannot be served by this dialer
    #[error("Unsupported dial target: {0}")]
    Unsupported(String),

    /// Inventory or other collaborator failed unexpectedly
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DialError {
    /// Whether the caller should retry later rather than give up
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DialError::AgentNotReady(_)
                | DialError::NoNodeSession(_)
                | DialError::NoSession(_)
                | DialError::SessionGone(_)
                | DialError::Timeout { .. }
        )
    }

    /// Status an HTTP proxy should answer with when this dial fails
    pub fn http_status(&self) -> StatusCode {
        match self {
            DialError::UnknownCluster(_) | DialError::UnknownNode { .. } => StatusCode::NOT_FOUND,
            DialError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            DialError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Failures of the inventory collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Inventory unavailable: {0}")]
    Internal(String),
}

impl InventoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InventoryError::NotFound { .. })
    }
}

/// Reasons an agent registration is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Malformed {0} header")]
    InvalidHeader(&'static str),

    #[error("Unknown registration token")]
    UnknownToken,

    #[error("Token refers to unknown cluster {0}")]
    UnknownCluster(ClusterId),

    #[error("Node {node} is not part of cluster {cluster}")]
    UnknownNode { cluster: ClusterId, node: NodeId },

    #[error("Inventory unavailable: {0}")]
    Inventory(String),
}

/// Session registry failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session registry is shutting down")]
    ShuttingDown,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DialError::AgentNotReady(ClusterId::new("c1")).is_transient());
        assert!(DialError::NoNodeSession(SessionKey::new("c1:n1")).is_transient());
        assert!(DialError::SessionGone(SessionKey::new("c1")).is_transient());
        assert!(DialError::Timeout {
            address: "1.2.3.4:443".into(),
            timeout: Duration::from_secs(15)
        }
        .is_transient());

        assert!(!DialError::UnknownCluster(ClusterId::new("c1")).is_transient());
        assert!(!DialError::Internal("boom".into()).is_transient());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            DialError::AgentNotReady(ClusterId::new("c1")).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DialError::ConnectFailed {
                address: "10.0.0.7:6443".into(),
                reason: "refused".into()
            }
            .http_status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            DialError::UnknownCluster(ClusterId::new("c1")).http_status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_agent_not_ready_message() {
        let err = DialError::AgentNotReady(ClusterId::new("c-42"));
        assert_eq!(err.to_string(), "Waiting for cluster agent to connect: c-42");
    }
}
