//! tether-server: Cluster dialer and reverse-tunnel server
//!
//! Remote agents open long-lived WebSocket transports into the server.
//! Each transport is registered under a session key and multiplexes many
//! logical connections. The dialer factory decides, per dial, whether a
//! cluster is reached directly or through one of those sessions.

pub mod auth;
pub mod dialer;
pub mod server;
pub mod session;
pub mod state;

pub use auth::{Authorizer, TokenAuthorizer};
pub use dialer::{ClusterDialer, DialPlan, DialerFactory, DockerDialer, NodeDialer};
pub use server::TunnelServer;
pub use session::{SessionRegistry, TunnelSession};
pub use state::ServerState;
