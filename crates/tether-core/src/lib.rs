//! tether-core: Core abstractions and configuration for tether
//!
//! This crate holds the domain model shared by the tunnel server and the
//! agent: cluster and node records, the read-only inventory contract,
//! session keys, the dialer abstraction, the error taxonomy and the
//! configuration files.

pub mod address;
pub mod config;
pub mod error;
pub mod inventory;
pub mod time;
pub mod token;
pub mod traits;
pub mod types;

pub use error::{DialError, TetherError};
pub use inventory::{Inventory, MemoryInventory};
pub use traits::{BoxedConn, Conn, Dialer};
pub use types::{
    Cluster, ClusterId, ClusterKind, ConditionStatus, Node, NodeAddresses, NodeId, NodeRole,
    OperatingSystem, SessionKey,
};
