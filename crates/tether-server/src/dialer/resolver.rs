//! API address translation for self-managed clusters
//!
//! Requests for a self-managed cluster's API endpoint are re-pointed at a
//! node's private address, so the tunnel lands on a healthy control plane
//! without another NAT hop.

use tether_core::address::{join_host_port, split_host_port};
use tether_core::{Cluster, Node, NodeRole};

/// Rewrite `address` for a dial through `cluster`'s session.
///
/// `api` is the cluster's canonical API `host:port`. Anything other than
/// the API is returned unchanged. For the API:
///
/// 1. when the cluster is ready and an eligible node's public address is
///    the API host, that node's private address is used;
/// 2. otherwise the last eligible control-plane node (in `NodeId` order)
///    whose public address is not the API host is used;
/// 3. otherwise the address is returned unchanged.
pub fn resolve_address(cluster: &Cluster, api: &str, address: &str, nodes: &[Node]) -> String {
    if address != api {
        return address.to_string();
    }

    let Some((host, port)) = split_host_port(address) else {
        return address.to_string();
    };

    let mut ordered: Vec<&Node> = nodes.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    tracing::debug!(
        "resolver: cluster {} ready={}, finding a node for {}",
        cluster.name(),
        cluster.ready,
        address
    );

    let mut last_good: Option<&str> = None;
    for node in ordered {
        if !node.is_eligible_landing() {
            tracing::debug!(
                "resolver: skipping node {} (conditions {:?}/{:?}/{:?}, deleting={}, private={:?})",
                node.name(),
                node.registered,
                node.provisioned,
                node.ready,
                node.deleting,
                node.addresses.private()
            );
            continue;
        }
        let Some(private) = node.addresses.private() else {
            continue;
        };

        if node.addresses.public() == Some(host) {
            if cluster.ready {
                tracing::debug!(
                    "resolver: node {} owns API host {}, using private address {}",
                    node.name(),
                    host,
                    private
                );
                return join_host_port(private, port);
            }
            tracing::debug!(
                "resolver: node {} owns API host {} but cluster is not ready",
                node.name(),
                host
            );
        } else if node.has_role(NodeRole::ControlPlane) {
            tracing::debug!(
                "resolver: control-plane node {} ({}) is a fallback candidate",
                node.name(),
                private
            );
            last_good = Some(private);
        }
    }

    match last_good {
        Some(private) => {
            tracing::debug!("resolver: using fallback {}:{}", private, port);
            join_host_port(private, port)
        }
        None => {
            tracing::debug!("resolver: no better target than {}", address);
            address.to_string()
        }
    }
}
