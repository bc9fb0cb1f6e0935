//! Token-based authorizer

use std::collections::HashMap;
use std::sync::Arc;

use http::HeaderMap;

use tether_core::config::TokenEntry;
use tether_core::error::{AuthError, InventoryError};
use tether_core::token::hash_token;
use tether_core::{ClusterId, Inventory, NodeId, SessionKey};

/// Registration token
pub const TOKEN_HEADER: &str = "x-tunnel-token";
/// Node the agent runs on; absent for cluster agents
pub const NODE_HEADER: &str = "x-tunnel-node";
/// Protocol version spoken by the agent
pub const VERSION_HEADER: &str = "x-tunnel-version";

/// Who an authorized agent is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Key the agent's session is registered under
    pub key: SessionKey,
    pub cluster: ClusterId,
    pub node: Option<NodeId>,
    /// Protocol version announced by the agent
    pub version: Option<String>,
}

/// Decides whether a registration request may install a session
pub trait Authorizer: Send + Sync {
    fn authorize(&self, headers: &HeaderMap) -> Result<AgentIdentity, AuthError>;
}

/// Authorizer backed by SHA-256 token digests
pub struct TokenAuthorizer {
    inventory: Arc<dyn Inventory>,
    /// Token digest -> cluster
    tokens: HashMap<String, ClusterId>,
}

impl TokenAuthorizer {
    pub fn new(inventory: Arc<dyn Inventory>, entries: Vec<TokenEntry>) -> Self {
        let tokens = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.token_sha256.to_ascii_lowercase(),
                    ClusterId::new(entry.cluster),
                )
            })
            .collect();
        Self { inventory, tokens }
    }

    /// Number of accepted tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, AuthError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()))
            .map_err(|_| AuthError::InvalidHeader(name)),
    }
}

impl Authorizer for TokenAuthorizer {
    fn authorize(&self, headers: &HeaderMap) -> Result<AgentIdentity, AuthError> {
        let token = header(headers, TOKEN_HEADER)?
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingHeader(TOKEN_HEADER))?;

        let cluster_id = self
            .tokens
            .get(&hash_token(token))
            .cloned()
            .ok_or(AuthError::UnknownToken)?;

        let cluster = self.inventory.get_cluster(&cluster_id).map_err(|e| match e {
            InventoryError::NotFound { .. } => AuthError::UnknownCluster(cluster_id.clone()),
            InventoryError::Internal(msg) => AuthError::Inventory(msg),
        })?;

        let version = header(headers, VERSION_HEADER)?.map(str::to_string);

        let node_id = header(headers, NODE_HEADER)?
            .filter(|n| !n.is_empty())
            .map(NodeId::new);

        let (key, node) = match node_id {
            Some(node_id) => {
                let node = self
                    .inventory
                    .get_node(&cluster.id, &node_id)
                    .map_err(|e| match e {
                        InventoryError::NotFound { .. } => AuthError::UnknownNode {
                            cluster: cluster.id.clone(),
                            node: node_id.clone(),
                        },
                        InventoryError::Internal(msg) => AuthError::Inventory(msg),
                    })?;
                (node.session_key(), Some(node_id))
            }
            None => (SessionKey::for_cluster(&cluster.id), None),
        };

        Ok(AgentIdentity {
            key,
            cluster: cluster.id,
            node,
            version,
        })
    }
}
