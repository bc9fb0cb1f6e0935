//! Agent sessions: the transport behind each session key and the registry
//! that maps keys to transports

mod health;
mod registry;
mod tunnel;

pub use health::HealthMonitor;
pub use registry::{RegistryStats, SessionDialer, SessionRegistry};
pub use tunnel::{TunnelSession, OUTBOUND_QUEUE};
