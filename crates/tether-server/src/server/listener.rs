//! Tunnel server listener

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::dialer::DialerFactory;
use crate::session::SessionRegistry;

/// HTTP server accepting agent transports
pub struct TunnelServer {
    router: Router,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
}

impl TunnelServer {
    pub fn new(factory: &DialerFactory, cancel: CancellationToken) -> Self {
        Self {
            router: factory.tunnel_router(),
            registry: Arc::clone(factory.registry()),
            cancel,
        }
    }

    /// Bind `bind_addr` and serve until cancelled
    pub async fn run(self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// Every agent session is closed on the way out.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Tunnel server listening on {}", local_addr);

        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("Tunnel server shutting down");
                // Upgraded transports are not tracked by the HTTP server
                registry.shutdown_all();
            })
            .await
            .context("Tunnel server failed")?;

        self.registry.shutdown_all();
        Ok(())
    }
}
