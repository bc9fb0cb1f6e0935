//! Shared state of the tunnel endpoint

use std::sync::Arc;

use crate::auth::Authorizer;
use crate::session::{HealthMonitor, SessionRegistry};

/// State handed to every registration request
pub struct ServerState {
    pub registry: Arc<SessionRegistry>,
    pub authorizer: Arc<dyn Authorizer>,
    pub health: HealthMonitor,
}

impl ServerState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        authorizer: Arc<dyn Authorizer>,
        health: HealthMonitor,
    ) -> Self {
        Self {
            registry,
            authorizer,
            health,
        }
    }
}
