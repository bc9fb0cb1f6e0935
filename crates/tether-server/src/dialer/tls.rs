//! Docker-over-TLS dials for nodes without an agent session

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use tether_core::{BoxedConn, ClusterId, DialError, Dialer, Node, NodeId};

use super::native::NativeDialer;

/// Marker a target must carry to be served by [`DockerTlsDialer`]
const DOCKER_SOCKET_MARKER: &str = "docker.sock";

/// TLS endpoint of a node's Docker daemon
#[derive(Clone)]
pub struct NodeTlsMaterial {
    /// `host:port` of the daemon
    pub address: String,
    /// Name to verify the daemon certificate against
    pub server_name: String,
    pub config: Arc<ClientConfig>,
}

impl std::fmt::Debug for NodeTlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTlsMaterial")
            .field("address", &self.address)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Source of per-node TLS material
#[async_trait]
pub trait NodeTlsStore: Send + Sync {
    async fn tls_material(&self, node: &Node) -> Result<NodeTlsMaterial, DialError>;
}

/// In-memory store keyed by cluster and node
#[derive(Debug, Default)]
pub struct StaticTlsStore {
    entries: DashMap<(ClusterId, NodeId), NodeTlsMaterial>,
}

impl StaticTlsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cluster: ClusterId, node: NodeId, material: NodeTlsMaterial) {
        self.entries.insert((cluster, node), material);
    }

    pub fn remove(&self, cluster: &ClusterId, node: &NodeId) -> Option<NodeTlsMaterial> {
        self.entries
            .remove(&(cluster.clone(), node.clone()))
            .map(|(_, material)| material)
    }
}

#[async_trait]
impl NodeTlsStore for StaticTlsStore {
    async fn tls_material(&self, node: &Node) -> Result<NodeTlsMaterial, DialError> {
        self.entries
            .get(&(node.cluster_id.clone(), node.id.clone()))
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                DialError::Internal(format!(
                    "no TLS material for node {}/{}",
                    node.cluster_id, node.id
                ))
            })
    }
}

/// Dials a node's Docker daemon over TLS, ignoring the requested socket
#[derive(Clone)]
pub struct DockerTlsDialer {
    material: NodeTlsMaterial,
    native: NativeDialer,
}

impl DockerTlsDialer {
    pub fn new(material: NodeTlsMaterial, native: NativeDialer) -> Self {
        Self { material, native }
    }

    /// Address of the daemon this dialer connects to
    pub fn address(&self) -> &str {
        &self.material.address
    }
}

#[async_trait]
impl Dialer for DockerTlsDialer {
    async fn dial(
        &self,
        _network: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError> {
        if !address.contains(DOCKER_SOCKET_MARKER) {
            return Err(DialError::Unsupported(format!(
                "only docker.sock connections are supported for this node, got {}",
                address
            )));
        }

        let server_name = ServerName::try_from(self.material.server_name.clone())
            .map_err(|e| DialError::Internal(format!("invalid TLS server name: {}", e)))?;

        tracing::debug!(
            "tls: dialing docker daemon at {} ({})",
            self.material.address,
            self.material.server_name
        );
        let tcp = self
            .native
            .connect_tcp("tcp", &self.material.address, cancel)
            .await?;

        let connector = TlsConnector::from(Arc::clone(&self.material.config));
        let handshake = connector.connect(server_name, tcp);
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(DialError::Cancelled),
            result = tokio::time::timeout(self.native.connect_timeout(), handshake) => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(DialError::ConnectFailed {
                        address: self.material.address.clone(),
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(DialError::Timeout {
                        address: self.material.address.clone(),
                        timeout: self.native.connect_timeout(),
                    })
                }
            },
        };

        Ok(Box::new(stream))
    }
}
