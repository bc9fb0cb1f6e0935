//! Read-only view of clusters and nodes
//!
//! The dialer never mutates inventory records. The surrounding control
//! plane owns them; `MemoryInventory` is the in-process snapshot the
//! daemon fills from an inventory file and tests fill directly.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, InventoryError};
use crate::types::{
    Cluster, ClusterId, ClusterKind, ConditionStatus, Node, NodeAddresses, NodeId, NodeRole,
    OperatingSystem,
};

/// Lookup contract for cluster and node records.
///
/// Implementations are expected to answer from a cache and may be stale;
/// callers must not rely on node listing order.
pub trait Inventory: Send + Sync {
    fn get_cluster(&self, id: &ClusterId) -> Result<Cluster, InventoryError>;

    fn list_nodes(&self, cluster: &ClusterId) -> Result<Vec<Node>, InventoryError>;

    fn get_node(&self, cluster: &ClusterId, node: &NodeId) -> Result<Node, InventoryError>;
}

/// Concurrent in-memory inventory
#[derive(Debug, Default)]
pub struct MemoryInventory {
    clusters: DashMap<ClusterId, Cluster>,
    nodes: DashMap<ClusterId, BTreeMap<NodeId, Node>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from an inventory file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let inventory = Self::new();
        inventory.reload(path)?;
        Ok(inventory)
    }

    /// Replace the whole snapshot with the contents of an inventory file
    pub fn reload(&self, path: &Path) -> Result<(), ConfigError> {
        let file: InventoryFile = crate::config::load_config(path)?;
        self.replace_all(file);
        tracing::info!(
            "Loaded inventory from {:?}: {} clusters",
            path,
            self.clusters.len()
        );
        Ok(())
    }

    /// Replace the whole snapshot.
    ///
    /// Records present in both snapshots stay visible throughout: new
    /// entries are written over the old ones before vanished keys are
    /// dropped, so concurrent readers see either version but never a gap.
    pub fn replace_all(&self, file: InventoryFile) {
        let mut clusters = HashMap::with_capacity(file.clusters.len());
        let mut nodes: HashMap<ClusterId, BTreeMap<NodeId, Node>> = HashMap::new();
        for record in file.clusters {
            let (cluster, cluster_nodes) = record.into_parts();
            for node in cluster_nodes {
                nodes
                    .entry(node.cluster_id.clone())
                    .or_default()
                    .insert(node.id.clone(), node);
            }
            clusters.insert(cluster.id.clone(), cluster);
        }

        // Nodes land before their cluster and leave after it
        for (id, cluster_nodes) in &nodes {
            self.nodes.insert(id.clone(), cluster_nodes.clone());
        }
        for (id, cluster) in &clusters {
            self.clusters.insert(id.clone(), cluster.clone());
        }
        self.clusters.retain(|id, _| clusters.contains_key(id));
        self.nodes.retain(|id, _| nodes.contains_key(id));
    }

    pub fn upsert_cluster(&self, cluster: Cluster) {
        self.clusters.insert(cluster.id.clone(), cluster);
    }

    /// Remove a cluster together with its nodes
    pub fn remove_cluster(&self, id: &ClusterId) -> Option<Cluster> {
        self.nodes.remove(id);
        self.clusters.remove(id).map(|(_, c)| c)
    }

    pub fn upsert_node(&self, node: Node) {
        self.nodes
            .entry(node.cluster_id.clone())
            .or_default()
            .insert(node.id.clone(), node);
    }

    pub fn remove_node(&self, cluster: &ClusterId, node: &NodeId) -> Option<Node> {
        self.nodes.get_mut(cluster)?.remove(node)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }
}

impl Inventory for MemoryInventory {
    fn get_cluster(&self, id: &ClusterId) -> Result<Cluster, InventoryError> {
        self.clusters
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| InventoryError::NotFound {
                kind: "cluster",
                name: id.to_string(),
            })
    }

    fn list_nodes(&self, cluster: &ClusterId) -> Result<Vec<Node>, InventoryError> {
        Ok(self
            .nodes
            .get(cluster)
            .map(|nodes| nodes.values().cloned().collect())
            .unwrap_or_default())
    }

    fn get_node(&self, cluster: &ClusterId, node: &NodeId) -> Result<Node, InventoryError> {
        self.nodes
            .get(cluster)
            .and_then(|nodes| nodes.get(node).cloned())
            .ok_or_else(|| InventoryError::NotFound {
                kind: "node",
                name: format!("{}/{}", cluster, node),
            })
    }
}

/// On-disk inventory snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryFile {
    #[serde(default)]
    pub clusters: Vec<ClusterRecord>,
}

/// Cluster entry of an inventory file, with raw status fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterRecord {
    pub id: String,
    pub display_name: Option<String>,
    /// Provisioning driver, e.g. "rke", "imported", "gke"
    pub driver: String,
    /// Whether this is the control plane's own cluster
    pub internal: bool,
    pub api_endpoint: String,
    pub ready: bool,
    pub nodes: Vec<NodeRecord>,
}

/// Node entry of an inventory file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRecord {
    pub id: String,
    /// Defaults to the owning cluster's ID
    pub namespace: Option<String>,
    pub hostname: Option<String>,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
    pub roles: Vec<NodeRole>,
    pub registered: ConditionStatus,
    pub provisioned: ConditionStatus,
    pub ready: ConditionStatus,
    pub deleting: bool,
    pub operating_system: String,
}

impl ClusterRecord {
    /// Convert into domain records, classifying the cluster kind
    pub fn into_parts(self) -> (Cluster, Vec<Node>) {
        let id = ClusterId::new(self.id);
        let cluster = Cluster {
            id: id.clone(),
            display_name: self.display_name,
            kind: ClusterKind::classify(self.internal, &self.driver),
            api_endpoint: self.api_endpoint,
            ready: self.ready,
        };
        let nodes = self
            .nodes
            .into_iter()
            .map(|record| record.into_node(&id))
            .collect();
        (cluster, nodes)
    }
}

impl NodeRecord {
    fn into_node(self, cluster: &ClusterId) -> Node {
        Node {
            cluster_id: cluster.clone(),
            id: NodeId::new(self.id),
            namespace: self.namespace.unwrap_or_else(|| cluster.to_string()),
            hostname: self.hostname,
            addresses: NodeAddresses {
                public: self.public_address,
                private: self.private_address,
            },
            roles: self.roles,
            registered: self.registered,
            provisioned: self.provisioned,
            ready: self.ready,
            deleting: self.deleting,
            operating_system: if self.operating_system.is_empty() {
                OperatingSystem::default()
            } else {
                OperatingSystem::from_name(&self.operating_system)
            },
        }
    }
}
