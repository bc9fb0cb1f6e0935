//! Dialers for clusters and nodes
//!
//! The factory classifies each cluster dial (direct, over the cluster
//! agent's session, or over a node agent's session) and the resolver
//! picks the address a tunnelled API dial should land on.

mod factory;
mod native;
pub mod resolver;
mod tls;

pub use factory::{ClusterDialer, DialPlan, DialerFactory, DockerDialer, NodeDialer};
pub use native::NativeDialer;
pub use resolver::resolve_address;
pub use tls::{DockerTlsDialer, NodeTlsMaterial, NodeTlsStore, StaticTlsStore};
