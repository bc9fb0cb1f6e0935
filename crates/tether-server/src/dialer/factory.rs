//! Dialer factory
//!
//! Hands out dialers for clusters and nodes. Classification happens on
//! every dial against the inventory snapshot of that moment, so a dialer
//! obtained before an agent connects starts tunnelling once it does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tether_core::config::ServerConfig;
use tether_core::error::InventoryError;
use tether_core::{
    BoxedConn, ClusterId, ClusterKind, DialError, Dialer, Inventory, Node, NodeId, SessionKey,
};

use super::native::NativeDialer;
use super::resolver::resolve_address;
use super::tls::{DockerTlsDialer, NodeTlsStore};
use crate::auth::Authorizer;
use crate::session::{HealthMonitor, SessionDialer, SessionRegistry};
use crate::state::ServerState;

/// How a single cluster dial will be carried out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialPlan {
    /// Plain OS dial
    Native { address: String },
    /// Over the cluster agent's session
    Session { key: SessionKey, address: String },
    /// Over a node agent's session, standing in for a missing cluster agent
    ViaNode { key: SessionKey, address: String },
}

impl DialPlan {
    pub fn address(&self) -> &str {
        match self {
            DialPlan::Native { address }
            | DialPlan::Session { address, .. }
            | DialPlan::ViaNode { address, .. } => address,
        }
    }
}

/// Collaborators shared by every dialer a factory hands out
struct DialContext {
    inventory: Arc<dyn Inventory>,
    registry: Arc<SessionRegistry>,
    native: NativeDialer,
    session_timeout: Duration,
    loopback_api_address: String,
}

impl DialContext {
    fn get_node(&self, cluster: &ClusterId, node: &NodeId) -> Result<Node, DialError> {
        self.inventory.get_node(cluster, node).map_err(|e| match e {
            InventoryError::NotFound { .. } => DialError::UnknownNode {
                cluster: cluster.clone(),
                node: node.clone(),
            },
            InventoryError::Internal(msg) => DialError::Internal(msg),
        })
    }

    fn session_dialer(&self, key: SessionKey) -> SessionDialer {
        self.registry.dialer(key, self.session_timeout)
    }
}

/// Builds dialers for clusters and nodes and serves agent registrations
pub struct DialerFactory {
    context: Arc<DialContext>,
    authorizer: Arc<dyn Authorizer>,
    health: HealthMonitor,
    tunnel_path: String,
    tls_store: Option<Arc<dyn NodeTlsStore>>,
}

impl DialerFactory {
    /// Factory with default timeouts
    pub fn new(
        inventory: Arc<dyn Inventory>,
        registry: Arc<SessionRegistry>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self::from_config(&ServerConfig::default(), inventory, registry, authorizer)
    }

    pub fn from_config(
        config: &ServerConfig,
        inventory: Arc<dyn Inventory>,
        registry: Arc<SessionRegistry>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            context: Arc::new(DialContext {
                inventory,
                registry,
                native: NativeDialer::from_timeouts(&config.timeouts),
                session_timeout: config.timeouts.session_dial,
                loopback_api_address: config.loopback_api_address.clone(),
            }),
            authorizer,
            health: HealthMonitor::from_config(config),
            tunnel_path: config.tunnel_path.clone(),
            tls_store: None,
        }
    }

    /// Source of TLS material for [`DialerFactory::docker_tls_dialer`]
    pub fn with_tls_store(mut self, store: Arc<dyn NodeTlsStore>) -> Self {
        self.tls_store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.context.registry
    }

    pub fn inventory(&self) -> &Arc<dyn Inventory> {
        &self.context.inventory
    }

    /// Dialer for traffic into a cluster
    pub fn cluster_dialer(&self, cluster: impl Into<ClusterId>) -> ClusterDialer {
        ClusterDialer {
            context: Arc::clone(&self.context),
            cluster: cluster.into(),
        }
    }

    /// Dialer for a node's Docker daemon over the node's session.
    ///
    /// Fails immediately when the node is unknown or has no session.
    pub fn docker_dialer(
        &self,
        cluster: &ClusterId,
        node: &NodeId,
    ) -> Result<DockerDialer, DialError> {
        let node = self.context.get_node(cluster, node)?;
        let key = node.session_key();
        if !self.context.registry.has_session(&key) {
            return Err(DialError::NoNodeSession(key));
        }

        let (network, address) = node.operating_system.docker_endpoint();
        tracing::debug!(
            "factory: docker dialer for node {} uses {}/{}",
            node.name(),
            network,
            address
        );
        Ok(DockerDialer {
            session: self.context.session_dialer(key),
            network,
            address,
        })
    }

    /// Dialer forwarding arbitrary targets over a node's session
    pub fn node_dialer(&self, cluster: impl Into<ClusterId>, node: impl Into<NodeId>) -> NodeDialer {
        NodeDialer {
            context: Arc::clone(&self.context),
            cluster: cluster.into(),
            node: node.into(),
        }
    }

    /// Dialer for a node's Docker daemon exposed over TLS
    pub async fn docker_tls_dialer(
        &self,
        cluster: &ClusterId,
        node: &NodeId,
    ) -> Result<DockerTlsDialer, DialError> {
        let store = self
            .tls_store
            .as_ref()
            .ok_or_else(|| DialError::Internal("no node TLS store configured".to_string()))?;
        let node = self.context.get_node(cluster, node)?;
        let material = store.tls_material(&node).await?;
        Ok(DockerTlsDialer::new(material, self.context.native))
    }

    /// HTTP router accepting agent registrations
    pub fn tunnel_router(&self) -> axum::Router {
        let state = ServerState::new(
            Arc::clone(&self.context.registry),
            Arc::clone(&self.authorizer),
            self.health,
        );
        crate::server::tunnel_router(Arc::new(state), &self.tunnel_path)
    }
}

/// Dialer for one cluster
#[derive(Clone)]
pub struct ClusterDialer {
    context: Arc<DialContext>,
    cluster: ClusterId,
}

impl ClusterDialer {
    pub fn cluster(&self) -> &ClusterId {
        &self.cluster
    }

    /// Decide how a dial to `address` would be carried out right now
    pub fn plan(&self, address: &str) -> Result<DialPlan, DialError> {
        let ctx = &self.context;
        let cluster = ctx.inventory.get_cluster(&self.cluster).map_err(|e| match e {
            InventoryError::NotFound { .. } => DialError::UnknownCluster(self.cluster.clone()),
            InventoryError::Internal(msg) => DialError::Internal(msg),
        })?;

        if cluster.kind == ClusterKind::Internal {
            return Ok(DialPlan::Native {
                address: address.to_string(),
            });
        }

        let api = cluster.api_host_port();
        tracing::debug!("factory: API endpoint of cluster {} is [{}]", cluster.name(), api);
        // No endpoint means no address is the API
        let is_api = !api.is_empty() && address == api;
        if is_api && cluster.kind == ClusterKind::CloudProvisioned {
            return Ok(DialPlan::Native {
                address: address.to_string(),
            });
        }

        let key = SessionKey::for_cluster(&cluster.id);
        if ctx.registry.has_session(&key) {
            tracing::debug!("factory: tunnel session found for cluster {}", cluster.name());
            let address = if cluster.kind == ClusterKind::SelfManaged {
                match ctx.inventory.list_nodes(&cluster.id) {
                    Ok(nodes) => resolve_address(&cluster, &api, address, &nodes),
                    Err(e) => {
                        tracing::debug!(
                            "factory: cannot list nodes of {}, keeping {}: {}",
                            cluster.name(),
                            address,
                            e
                        );
                        address.to_string()
                    }
                }
            } else {
                address.to_string()
            };
            return Ok(DialPlan::Session { key, address });
        }
        tracing::debug!("factory: no tunnel session found for cluster {}", cluster.name());

        if cluster.kind != ClusterKind::SelfManaged {
            return Err(DialError::AgentNotReady(cluster.id));
        }

        let mut nodes = ctx
            .inventory
            .list_nodes(&cluster.id)
            .map_err(|e| DialError::Internal(e.to_string()))?;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        for node in nodes.iter().filter(|n| n.is_usable_for_fallback()) {
            let key = node.session_key();
            if !ctx.registry.has_session(&key) {
                tracing::debug!("factory: node {} has no session, skipping", node.name());
                continue;
            }
            let address = if is_api {
                tracing::debug!(
                    "factory: rewriting {} to {} for node {}",
                    address,
                    ctx.loopback_api_address,
                    node.name()
                );
                ctx.loopback_api_address.clone()
            } else {
                address.to_string()
            };
            return Ok(DialPlan::ViaNode { key, address });
        }

        Err(DialError::AgentNotReady(cluster.id))
    }
}

#[async_trait]
impl Dialer for ClusterDialer {
    async fn dial(
        &self,
        network: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError> {
        match self.plan(address)? {
            DialPlan::Native { address } => {
                self.context.native.dial(network, &address, cancel).await
            }
            DialPlan::Session { key, address } | DialPlan::ViaNode { key, address } => {
                tracing::debug!(
                    "factory: dialing {}/{} over session {}",
                    network,
                    address,
                    key
                );
                self.context
                    .session_dialer(key)
                    .dial(network, &address, cancel)
                    .await
            }
        }
    }
}

/// Dialer for a node's Docker daemon socket
#[derive(Debug, Clone)]
pub struct DockerDialer {
    session: SessionDialer,
    network: &'static str,
    address: &'static str,
}

impl DockerDialer {
    /// Socket actually dialed, whatever the caller asks for
    pub fn target(&self) -> (&'static str, &'static str) {
        (self.network, self.address)
    }

    pub fn session_key(&self) -> &SessionKey {
        self.session.key()
    }
}

#[async_trait]
impl Dialer for DockerDialer {
    async fn dial(
        &self,
        _network: &str,
        _address: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError> {
        self.session.dial(self.network, self.address, cancel).await
    }
}

/// Dialer for arbitrary targets reachable from one node
#[derive(Clone)]
pub struct NodeDialer {
    context: Arc<DialContext>,
    cluster: ClusterId,
    node: NodeId,
}

impl NodeDialer {
    /// Session the next dial would use
    pub fn session_key(&self) -> Result<SessionKey, DialError> {
        let node = self.context.get_node(&self.cluster, &self.node)?;
        let key = node.session_key();
        if !self.context.registry.has_session(&key) {
            return Err(DialError::NoNodeSession(key));
        }
        Ok(key)
    }
}

#[async_trait]
impl Dialer for NodeDialer {
    async fn dial(
        &self,
        network: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError> {
        let key = self.session_key()?;
        self.context
            .session_dialer(key)
            .dial(network, address, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuthorizer;
    use crate::session::TunnelSession;
    use tether_core::{
        Cluster, ConditionStatus, MemoryInventory, NodeAddresses, NodeRole, OperatingSystem,
    };
    use tether_protocol::{Frame, Message};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    struct Fixture {
        inventory: Arc<MemoryInventory>,
        registry: Arc<SessionRegistry>,
        factory: DialerFactory,
        // Keep outbound queues open for registered sessions
        queues: Vec<mpsc::Receiver<Frame>>,
    }

    impl Fixture {
        fn new() -> Self {
            let inventory = Arc::new(MemoryInventory::new());
            let registry = Arc::new(SessionRegistry::new());
            let authorizer = Arc::new(TokenAuthorizer::new(inventory.clone(), Vec::new()));
            let factory = DialerFactory::new(inventory.clone(), registry.clone(), authorizer);
            Self {
                inventory,
                registry,
                factory,
                queues: Vec::new(),
            }
        }

        fn cluster(&self, id: &str, kind: ClusterKind, endpoint: &str, ready: bool) {
            self.inventory
                .upsert_cluster(Cluster::new(id, kind, endpoint).with_ready(ready));
        }

        fn node(&self, cluster: &str, id: &str, public: &str, private: &str, roles: &[NodeRole]) -> Node {
            let mut node = Node::new(cluster, id);
            node.registered = ConditionStatus::True;
            node.provisioned = ConditionStatus::True;
            node.ready = ConditionStatus::True;
            node.addresses = NodeAddresses::new(Some(public), Some(private));
            node.roles = roles.to_vec();
            self.inventory.upsert_node(node.clone());
            node
        }

        fn connect(&mut self, key: SessionKey) -> Arc<TunnelSession> {
            let (session, rx) = TunnelSession::new(key);
            self.registry.register(Arc::clone(&session)).unwrap();
            self.queues.push(rx);
            session
        }
    }

    fn plan(fixture: &Fixture, cluster: &str, address: &str) -> Result<DialPlan, DialError> {
        fixture.factory.cluster_dialer(cluster).plan(address)
    }

    #[test]
    fn test_unknown_cluster() {
        let fixture = Fixture::new();
        assert!(matches!(
            plan(&fixture, "nope", "1.2.3.4:443"),
            Err(DialError::UnknownCluster(_))
        ));
    }

    #[test]
    fn test_internal_cluster_never_consults_registry() {
        let mut fixture = Fixture::new();
        fixture.cluster("C0", ClusterKind::Internal, "", true);
        fixture.connect(SessionKey::new("C0"));
        let before = fixture.registry.stats().lookups;

        assert_eq!(
            plan(&fixture, "C0", "10.0.0.5:443").unwrap(),
            DialPlan::Native {
                address: "10.0.0.5:443".to_string()
            }
        );
        assert_eq!(fixture.registry.stats().lookups, before);
    }

    #[test]
    fn test_cloud_api_bypasses_tunnel() {
        let mut fixture = Fixture::new();
        fixture.cluster("C1", ClusterKind::CloudProvisioned, "https://1.2.3.4:6443", true);

        assert_eq!(
            plan(&fixture, "C1", "1.2.3.4:6443").unwrap(),
            DialPlan::Native {
                address: "1.2.3.4:6443".to_string()
            }
        );

        // Other targets need the agent
        assert!(matches!(
            plan(&fixture, "C1", "1.2.3.4:8080"),
            Err(DialError::AgentNotReady(_))
        ));

        fixture.connect(SessionKey::new("C1"));
        assert_eq!(
            plan(&fixture, "C1", "1.2.3.4:8080").unwrap(),
            DialPlan::Session {
                key: SessionKey::new("C1"),
                address: "1.2.3.4:8080".to_string()
            }
        );
    }

    #[test]
    fn test_missing_endpoint_never_matches_empty_address() {
        let mut fixture = Fixture::new();
        fixture.cluster("C1", ClusterKind::CloudProvisioned, "", true);
        assert!(matches!(
            plan(&fixture, "C1", ""),
            Err(DialError::AgentNotReady(_))
        ));

        fixture.cluster("C4", ClusterKind::SelfManaged, "", true);
        let node = fixture.node("C4", "n1", "", "", &[]);
        fixture.connect(node.session_key());
        assert_eq!(
            plan(&fixture, "C4", "").unwrap(),
            DialPlan::ViaNode {
                key: SessionKey::new("C4:n1"),
                address: String::new()
            }
        );
    }

    #[test]
    fn test_imported_cluster_keeps_address() {
        let mut fixture = Fixture::new();
        fixture.cluster("C5", ClusterKind::Imported, "https://5.5.5.5:6443", true);
        fixture.node("C5", "n1", "5.5.5.5", "10.0.0.7", &[NodeRole::ControlPlane]);
        fixture.connect(SessionKey::new("C5"));

        assert_eq!(
            plan(&fixture, "C5", "5.5.5.5:6443").unwrap().address(),
            "5.5.5.5:6443"
        );
    }

    #[test]
    fn test_self_managed_private_rewrite() {
        let mut fixture = Fixture::new();
        fixture.cluster("C2", ClusterKind::SelfManaged, "https://5.5.5.5:6443", true);
        fixture.node("C2", "n1", "5.5.5.5", "10.0.0.7", &[]);
        fixture.connect(SessionKey::new("C2"));

        assert_eq!(
            plan(&fixture, "C2", "5.5.5.5:6443").unwrap(),
            DialPlan::Session {
                key: SessionKey::new("C2"),
                address: "10.0.0.7:6443".to_string()
            }
        );
    }

    #[test]
    fn test_self_managed_unready_control_plane_fallback() {
        let mut fixture = Fixture::new();
        fixture.cluster("C3", ClusterKind::SelfManaged, "https://5.5.5.5:6443", false);
        fixture.node("C3", "n1", "6.6.6.6", "10.0.0.8", &[NodeRole::ControlPlane]);
        fixture.connect(SessionKey::new("C3"));

        assert_eq!(
            plan(&fixture, "C3", "5.5.5.5:6443").unwrap().address(),
            "10.0.0.8:6443"
        );
    }

    #[test]
    fn test_self_managed_without_session_uses_node() {
        let mut fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "https://5.5.5.5:6443", true);
        let node = fixture.node("C4", "n1", "5.5.5.5", "10.0.0.7", &[]);
        fixture.connect(node.session_key());

        assert_eq!(
            plan(&fixture, "C4", "5.5.5.5:6443").unwrap(),
            DialPlan::ViaNode {
                key: SessionKey::new("C4:n1"),
                address: "127.0.0.1:6443".to_string()
            }
        );
        // Non-API targets pass through
        assert_eq!(
            plan(&fixture, "C4", "10.43.0.10:53").unwrap().address(),
            "10.43.0.10:53"
        );
    }

    #[test]
    fn test_node_fallback_skips_unusable_nodes() {
        let mut fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "https://5.5.5.5:6443", true);

        let mut deleting = fixture.node("C4", "a", "", "", &[]);
        deleting.deleting = true;
        fixture.inventory.upsert_node(deleting.clone());
        fixture.connect(deleting.session_key());

        // Provisioned but without a session
        fixture.node("C4", "b", "", "", &[]);

        let usable = fixture.node("C4", "c", "", "", &[]);
        fixture.connect(usable.session_key());

        match plan(&fixture, "C4", "5.5.5.5:6443").unwrap() {
            DialPlan::ViaNode { key, .. } => assert_eq!(key, usable.session_key()),
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn test_self_managed_nothing_available() {
        let fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "https://5.5.5.5:6443", true);
        let mut node = fixture.node("C4", "n1", "", "", &[]);
        node.provisioned = ConditionStatus::False;
        fixture.inventory.upsert_node(node);

        assert!(matches!(
            plan(&fixture, "C4", "5.5.5.5:6443"),
            Err(DialError::AgentNotReady(_))
        ));
    }

    #[test]
    fn test_cluster_session_preferred_over_node() {
        let mut fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "https://5.5.5.5:6443", true);
        let node = fixture.node("C4", "n1", "7.7.7.7", "10.0.0.7", &[]);
        fixture.connect(node.session_key());
        fixture.connect(SessionKey::new("C4"));

        assert!(matches!(
            plan(&fixture, "C4", "5.5.5.5:6443").unwrap(),
            DialPlan::Session { .. }
        ));
    }

    #[test]
    fn test_custom_loopback_address() {
        let inventory = Arc::new(MemoryInventory::new());
        let registry = Arc::new(SessionRegistry::new());
        let mut config = ServerConfig::default();
        config.loopback_api_address = "127.0.0.1:16443".to_string();
        let authorizer = Arc::new(TokenAuthorizer::new(inventory.clone(), Vec::new()));
        let factory =
            DialerFactory::from_config(&config, inventory.clone(), registry.clone(), authorizer);

        inventory.upsert_cluster(Cluster::new("C4", ClusterKind::SelfManaged, "https://5.5.5.5"));
        let mut node = Node::new("C4", "n1");
        node.provisioned = ConditionStatus::True;
        inventory.upsert_node(node.clone());
        let (session, _rx) = TunnelSession::new(node.session_key());
        registry.register(session).unwrap();

        assert_eq!(
            factory.cluster_dialer("C4").plan("5.5.5.5:443").unwrap().address(),
            "127.0.0.1:16443"
        );
    }

    #[test]
    fn test_docker_dialer_socket_selection() {
        let mut fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "https://5.5.5.5:6443", true);

        let mut windows = fixture.node("C4", "N1", "", "", &[]);
        windows.operating_system = OperatingSystem::Windows;
        fixture.inventory.upsert_node(windows.clone());
        fixture.connect(windows.session_key());

        let mut other = fixture.node("C4", "N2", "", "", &[]);
        other.operating_system = OperatingSystem::Other;
        fixture.inventory.upsert_node(other.clone());
        fixture.connect(other.session_key());

        let dialer = fixture
            .factory
            .docker_dialer(&ClusterId::new("C4"), &NodeId::new("N1"))
            .unwrap();
        assert_eq!(dialer.target(), ("npipe", "//./pipe/docker_engine"));
        assert_eq!(dialer.session_key(), &windows.session_key());

        let dialer = fixture
            .factory
            .docker_dialer(&ClusterId::new("C4"), &NodeId::new("N2"))
            .unwrap();
        assert_eq!(dialer.target(), ("unix", "/var/run/docker.sock"));
    }

    #[test]
    fn test_docker_dialer_errors() {
        let fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "", true);
        fixture.node("C4", "N1", "", "", &[]);

        assert!(matches!(
            fixture
                .factory
                .docker_dialer(&ClusterId::new("C4"), &NodeId::new("missing")),
            Err(DialError::UnknownNode { .. })
        ));
        assert!(matches!(
            fixture
                .factory
                .docker_dialer(&ClusterId::new("C4"), &NodeId::new("N1")),
            Err(DialError::NoNodeSession(_))
        ));
    }

    #[tokio::test]
    async fn test_docker_dialer_ignores_requested_target() {
        let mut fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "", true);
        let mut node = fixture.node("C4", "N1", "", "", &[]);
        node.operating_system = OperatingSystem::Windows;
        fixture.inventory.upsert_node(node.clone());
        fixture.connect(node.session_key());
        let mut agent = fixture.queues.pop().unwrap();

        let dialer = fixture
            .factory
            .docker_dialer(&ClusterId::new("C4"), &NodeId::new("N1"))
            .unwrap();
        let dialing = tokio::spawn(async move {
            dialer
                .dial("tcp", "ignored", &CancellationToken::new())
                .await
                .map(|_| ())
        });

        let frame = agent.recv().await.unwrap();
        assert_eq!(
            frame.message,
            Message::Connect {
                network: "npipe".to_string(),
                address: "//./pipe/docker_engine".to_string(),
            }
        );
        let session = fixture.registry.get(&node.session_key()).unwrap();
        session
            .handle_frame(Frame::new(frame.stream_id, Message::Connected))
            .await;
        assert!(dialing.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_node_dialer_is_lazy() {
        let mut fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "", true);

        // Created before the node exists
        let dialer = fixture.factory.node_dialer("C4", "N1");
        let result = dialer
            .dial("tcp", "10.0.0.1:22", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DialError::UnknownNode { .. })));

        let node = fixture.node("C4", "N1", "", "", &[]);
        assert!(matches!(
            dialer.session_key(),
            Err(DialError::NoNodeSession(_))
        ));

        fixture.connect(node.session_key());
        assert_eq!(dialer.session_key().unwrap(), node.session_key());
    }

    #[tokio::test]
    async fn test_cluster_dial_over_session_rewrites_address() {
        let mut fixture = Fixture::new();
        fixture.cluster("C2", ClusterKind::SelfManaged, "https://5.5.5.5:6443", true);
        fixture.node("C2", "n1", "5.5.5.5", "10.0.0.7", &[]);
        let session = fixture.connect(SessionKey::new("C2"));
        let mut agent = fixture.queues.pop().unwrap();

        let dialer = fixture.factory.cluster_dialer("C2");
        let dialing = tokio::spawn(async move {
            dialer
                .dial("tcp", "5.5.5.5:6443", &CancellationToken::new())
                .await
        });

        let frame = agent.recv().await.unwrap();
        assert_eq!(
            frame.message,
            Message::Connect {
                network: "tcp".to_string(),
                address: "10.0.0.7:6443".to_string(),
            }
        );
        session
            .handle_frame(Frame::new(frame.stream_id, Message::Connected))
            .await;
        let mut conn = dialing.await.unwrap().unwrap();

        conn.write_all(b"GET /version").await.unwrap();
        let data = agent.recv().await.unwrap();
        assert_eq!(data.stream_id, frame.stream_id);
        assert!(matches!(data.message, Message::Data(_)));
    }

    #[tokio::test]
    async fn test_internal_cluster_native_dial() {
        let fixture = Fixture::new();
        fixture.cluster("C0", ClusterKind::Internal, "", true);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ok").await.unwrap();
        });

        let mut conn = fixture
            .factory
            .cluster_dialer("C0")
            .dial("tcp", &address, &CancellationToken::new())
            .await
            .unwrap();
        let mut buf = [0u8; 2];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
        assert_eq!(fixture.registry.stats().lookups, 0);
    }

    #[tokio::test]
    async fn test_docker_tls_dialer_requires_store() {
        let fixture = Fixture::new();
        fixture.cluster("C4", ClusterKind::SelfManaged, "", true);
        fixture.node("C4", "N1", "", "", &[]);

        let result = fixture
            .factory
            .docker_tls_dialer(&ClusterId::new("C4"), &NodeId::new("N1"))
            .await;
        assert!(matches!(result, Err(DialError::Internal(_))));
    }

    #[test]
    fn test_repeated_dialers_agree() {
        let mut fixture = Fixture::new();
        fixture.cluster("C2", ClusterKind::SelfManaged, "https://5.5.5.5:6443", true);
        fixture.node("C2", "n1", "5.5.5.5", "10.0.0.7", &[]);
        fixture.connect(SessionKey::new("C2"));

        let first = plan(&fixture, "C2", "5.5.5.5:6443").unwrap();
        let second = plan(&fixture, "C2", "5.5.5.5:6443").unwrap();
        assert_eq!(first, second);
    }
}
