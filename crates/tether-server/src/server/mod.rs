//! Agent-facing HTTP endpoint
//!
//! Agents upgrade `GET {tunnel_path}` to a WebSocket; every binary message
//! carries one or more tunnel frames.

mod handler;
mod listener;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::state::ServerState;

pub use handler::{connect_handler, health_handler};
pub use listener::TunnelServer;

/// Router serving agent registrations on `tunnel_path` and `/healthz`
pub fn tunnel_router(state: Arc<ServerState>, tunnel_path: &str) -> Router {
    Router::new()
        .route(tunnel_path, get(connect_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
}
