//! tether-agent: remote end of the reverse tunnel
//!
//! The agent runs next to a cluster or on a node, opens an outbound
//! WebSocket session to the tunnel server, and serves the server's
//! `Connect` requests by dialing local sockets.

pub mod agent;
pub mod tunnel;

pub use agent::Agent;
