//! Tunnel management for the connection to the server

mod connector;
mod dialer;
mod reconnect;
mod session;

pub use connector::{AgentSocket, ConnectionError, TunnelConnector};
pub use dialer::LocalDialer;
pub use reconnect::ExponentialBackoff;
pub use session::{run_session, DisconnectReason};
