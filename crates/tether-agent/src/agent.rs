//! Agent lifecycle: connect, serve, reconnect

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tether_core::config::AgentConfig;
use tether_core::Dialer;

use crate::tunnel::{
    run_session, ConnectionError, DisconnectReason, ExponentialBackoff, LocalDialer,
    TunnelConnector,
};

/// Pause before reconnecting after an established session ends
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A running tunnel agent
pub struct Agent {
    connector: TunnelConnector,
    dialer: Arc<dyn Dialer>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let dialer = Arc::new(LocalDialer::from_config(&config));
        Self::with_dialer(config, dialer)
    }

    /// Agent serving `Connect` requests through a custom dialer
    pub fn with_dialer(config: AgentConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            connector: TunnelConnector::new(config),
            dialer,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        self.connector.config()
    }

    /// Keep a session open until `cancel` fires.
    ///
    /// Returns an error only when the server rejects the agent or the
    /// registration request cannot be built; both are permanent.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ConnectionError> {
        let mut backoff = ExponentialBackoff::from_config(&self.config().backoff);

        loop {
            let socket = match self.connector.connect_with_retry(&mut backoff, &cancel).await {
                Ok(socket) => socket,
                Err(ConnectionError::Cancelled) => return Ok(()),
                Err(e) => {
                    tracing::error!("Giving up on {}: {}", self.config().server_url, e);
                    return Err(e);
                }
            };
            backoff.reset();

            tracing::info!("Tunnel established, serving requests");
            let reason = run_session(socket, Arc::clone(&self.dialer), &cancel).await;
            if reason == DisconnectReason::Cancelled {
                tracing::info!("Agent stopping");
                return Ok(());
            }
            tracing::warn!("Disconnected: {:?}", reason);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
            tracing::info!("Reconnecting...");
        }
    }
}
