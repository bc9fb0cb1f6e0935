//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Stable opaque identifier of a cluster
    ClusterId
);

string_id!(
    /// Identifier of a node, unique within its cluster
    NodeId
);

string_id!(
    /// Key under which an agent session is registered.
    ///
    /// Cluster agents register under the cluster ID, node agents under
    /// `"namespace:node"`.
    SessionKey
);

impl SessionKey {
    /// Session key of a cluster agent
    pub fn for_cluster(cluster: &ClusterId) -> Self {
        Self(cluster.0.clone())
    }

    /// Session key of a node agent
    pub fn for_node(namespace: &str, node: &NodeId) -> Self {
        Self(format!("{}:{}", namespace, node))
    }
}

/// How a cluster was brought under management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterKind {
    /// The control plane's own host cluster, always dialed directly
    Internal,
    /// Provisioned by the control plane on caller-supplied machines
    SelfManaged,
    /// An existing cluster registered by running an agent in it
    Imported,
    /// A hosted cluster whose API is reachable without a tunnel
    CloudProvisioned,
}

/// Driver name of self-managed clusters
pub const DRIVER_SELF_MANAGED: &str = "rke";

/// Driver name of imported clusters
pub const DRIVER_IMPORTED: &str = "imported";

impl ClusterKind {
    /// Derive the kind from the cluster's status fields.
    ///
    /// Any driver other than the self-managed and imported ones, including
    /// an empty driver, counts as cloud-provisioned.
    pub fn classify(internal: bool, driver: &str) -> Self {
        if internal {
            return ClusterKind::Internal;
        }
        if driver.eq_ignore_ascii_case(DRIVER_SELF_MANAGED) {
            ClusterKind::SelfManaged
        } else if driver.eq_ignore_ascii_case(DRIVER_IMPORTED) {
            ClusterKind::Imported
        } else {
            ClusterKind::CloudProvisioned
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterKind::Internal => write!(f, "internal"),
            ClusterKind::SelfManaged => write!(f, "self-managed"),
            ClusterKind::Imported => write!(f, "imported"),
            ClusterKind::CloudProvisioned => write!(f, "cloud-provisioned"),
        }
    }
}

/// Three-valued condition status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn is_true(&self) -> bool {
        matches!(self, ConditionStatus::True)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ConditionStatus::Unknown)
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Role a node plays in its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
    Etcd,
}

/// Node operating system, as far as socket selection cares
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystem {
    #[default]
    Linux,
    Windows,
    Other,
}

impl OperatingSystem {
    /// Parse a reported OS name; unrecognised names map to `Other`
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "linux" => OperatingSystem::Linux,
            "windows" => OperatingSystem::Windows,
            _ => OperatingSystem::Other,
        }
    }

    /// `(network, address)` of the local Docker daemon socket
    pub fn docker_endpoint(&self) -> (&'static str, &'static str) {
        match self {
            OperatingSystem::Windows => ("npipe", "//./pipe/docker_engine"),
            OperatingSystem::Linux | OperatingSystem::Other => ("unix", "/var/run/docker.sock"),
        }
    }
}

/// Addresses a node reported about itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddresses {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
}

impl NodeAddresses {
    pub fn new(public: Option<&str>, private: Option<&str>) -> Self {
        Self {
            public: public.map(str::to_string),
            private: private.map(str::to_string),
        }
    }

    /// Public address, with empty strings treated as absent
    pub fn public(&self) -> Option<&str> {
        self.public.as_deref().filter(|s| !s.is_empty())
    }

    /// Private address, with empty strings treated as absent
    pub fn private(&self) -> Option<&str> {
        self.private.as_deref().filter(|s| !s.is_empty())
    }
}

/// A managed cluster, as seen by the dialer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: ClusterId,
    pub display_name: Option<String>,
    pub kind: ClusterKind,
    /// URL of the cluster's API endpoint, possibly empty
    pub api_endpoint: String,
    /// Whether the cluster's readiness condition is true
    pub ready: bool,
}

impl Cluster {
    pub fn new(id: impl Into<ClusterId>, kind: ClusterKind, api_endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            kind,
            api_endpoint: api_endpoint.into(),
            ready: false,
        }
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Canonical `host:port` of the API endpoint, empty when the endpoint
    /// is missing or unparsable
    pub fn api_host_port(&self) -> String {
        address::api_host_port(&self.api_endpoint)
    }

    /// Name used in log lines
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// A machine belonging to a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub cluster_id: ClusterId,
    pub id: NodeId,
    /// Namespace the node record lives in; part of the node's session key
    pub namespace: String,
    pub hostname: Option<String>,
    pub addresses: NodeAddresses,
    pub roles: Vec<NodeRole>,
    pub registered: ConditionStatus,
    pub provisioned: ConditionStatus,
    pub ready: ConditionStatus,
    /// Whether deletion of the node has begun
    pub deleting: bool,
    pub operating_system: OperatingSystem,
}

impl Node {
    /// A node with unknown conditions, no roles and no addresses, living in
    /// its cluster's namespace
    pub fn new(cluster_id: impl Into<ClusterId>, id: impl Into<NodeId>) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            namespace: cluster_id.0.clone(),
            cluster_id,
            id: id.into(),
            hostname: None,
            addresses: NodeAddresses::default(),
            roles: Vec::new(),
            registered: ConditionStatus::Unknown,
            provisioned: ConditionStatus::Unknown,
            ready: ConditionStatus::Unknown,
            deleting: false,
            operating_system: OperatingSystem::Linux,
        }
    }

    /// Key of this node's agent session
    pub fn session_key(&self) -> SessionKey {
        SessionKey::for_node(&self.namespace, &self.id)
    }

    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }

    /// Whether traffic for the cluster API may land on this node.
    ///
    /// Requires registered and provisioned, a readiness condition that is
    /// known (false is acceptable), no pending deletion and a private
    /// address.
    pub fn is_eligible_landing(&self) -> bool {
        self.registered.is_true()
            && self.provisioned.is_true()
            && !self.ready.is_unknown()
            && !self.deleting
            && self.addresses.private().is_some()
    }

    /// Whether the node can host a node-session fallback dial
    pub fn is_usable_for_fallback(&self) -> bool {
        self.provisioned.is_true() && !self.deleting
    }

    /// Name used in log lines
    pub fn name(&self) -> &str {
        self.hostname.as_deref().unwrap_or(self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eligible_node() -> Node {
        let mut node = Node::new("c1", "n1");
        node.registered = ConditionStatus::True;
        node.provisioned = ConditionStatus::True;
        node.ready = ConditionStatus::True;
        node.addresses = NodeAddresses::new(Some("5.5.5.5"), Some("10.0.0.7"));
        node
    }

    #[test]
    fn test_session_keys() {
        let cluster = ClusterId::new("c-abc");
        assert_eq!(SessionKey::for_cluster(&cluster).as_str(), "c-abc");

        let node = Node::new("c-abc", "m-123");
        assert_eq!(node.session_key().as_str(), "c-abc:m-123");
    }

    #[test]
    fn test_cluster_kind_classification() {
        assert_eq!(ClusterKind::classify(true, "rke"), ClusterKind::Internal);
        assert_eq!(ClusterKind::classify(false, "rke"), ClusterKind::SelfManaged);
        assert_eq!(ClusterKind::classify(false, "imported"), ClusterKind::Imported);
        assert_eq!(ClusterKind::classify(false, "gke"), ClusterKind::CloudProvisioned);
        assert_eq!(ClusterKind::classify(false, ""), ClusterKind::CloudProvisioned);
    }

    #[test]
    fn test_eligibility_accepts_ready_false() {
        let mut node = eligible_node();
        assert!(node.is_eligible_landing());

        node.ready = ConditionStatus::False;
        assert!(node.is_eligible_landing());

        node.ready = ConditionStatus::Unknown;
        assert!(!node.is_eligible_landing());
    }

    #[test]
    fn test_eligibility_rejects_each_failed_condition() {
        let mut node = eligible_node();
        node.registered = ConditionStatus::False;
        assert!(!node.is_eligible_landing());

        let mut node = eligible_node();
        node.provisioned = ConditionStatus::Unknown;
        assert!(!node.is_eligible_landing());

        let mut node = eligible_node();
        node.deleting = true;
        assert!(!node.is_eligible_landing());

        let mut node = eligible_node();
        node.addresses.private = Some(String::new());
        assert!(!node.is_eligible_landing());
    }

    #[test]
    fn test_docker_endpoint_by_os() {
        assert_eq!(
            OperatingSystem::Windows.docker_endpoint(),
            ("npipe", "//./pipe/docker_engine")
        );
        assert_eq!(
            OperatingSystem::Linux.docker_endpoint(),
            ("unix", "/var/run/docker.sock")
        );
        assert_eq!(
            OperatingSystem::from_name("freebsd").docker_endpoint(),
            ("unix", "/var/run/docker.sock")
        );
    }

    #[test]
    fn test_cluster_api_host_port() {
        let cluster = Cluster::new("c1", ClusterKind::CloudProvisioned, "https://1.2.3.4:6443");
        assert_eq!(cluster.api_host_port(), "1.2.3.4:6443");

        let cluster = Cluster::new("c1", ClusterKind::SelfManaged, "");
        assert_eq!(cluster.api_host_port(), "");
    }
}
