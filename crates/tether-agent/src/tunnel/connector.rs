//! Outbound WebSocket connector
//!
//! Opens the agent's transport to the tunnel server, presenting the
//! registration token and, for node agents, the node the agent runs on.

use anyhow::Context;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use tether_core::config::AgentConfig;
use tether_protocol::PROTOCOL_VERSION;

use super::reconnect::ExponentialBackoff;

/// Registration token
pub const TOKEN_HEADER: &str = "x-tunnel-token";
/// Node the agent runs on
pub const NODE_HEADER: &str = "x-tunnel-node";
/// Protocol version spoken by the agent
pub const VERSION_HEADER: &str = "x-tunnel-version";

/// Established transport to the server
pub type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection errors that need handling beyond a retry
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The server refused the token or node; retrying cannot help
    #[error("registration rejected by server (HTTP {0})")]
    Rejected(StatusCode),

    /// Server URL or headers cannot form a request
    #[error("invalid registration request: {0}")]
    InvalidRequest(String),

    /// Stopped while connecting
    #[error("connection cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Establishes the outbound transport to the tunnel server
#[derive(Debug, Clone)]
pub struct TunnelConnector {
    config: AgentConfig,
}

impl TunnelConnector {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Connect with automatic retry.
    ///
    /// Rejections and malformed requests are returned immediately, every
    /// other failure is retried after the next backoff delay.
    pub async fn connect_with_retry(
        &self,
        backoff: &mut ExponentialBackoff,
        cancel: &CancellationToken,
    ) -> Result<AgentSocket, ConnectionError> {
        loop {
            match self.try_connect(cancel).await {
                Ok(socket) => {
                    tracing::info!("Connected to tunnel server at {}", self.config.server_url);
                    return Ok(socket);
                }
                Err(ConnectionError::Other(e)) => {
                    let delay = backoff.next_delay();
                    tracing::warn!("Connection failed: {:#}. Retrying in {:?}", e, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempt a single connection
    pub async fn try_connect(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AgentSocket, ConnectionError> {
        let request = self.request()?;

        tracing::debug!("Connecting to {}", self.config.server_url);
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        );
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            result = connect => result.context("Connection timed out")?,
        };

        match result {
            Ok((socket, _response)) => Ok(socket),
            Err(tokio_tungstenite::tungstenite::Error::Http(response))
                if is_rejection(response.status()) =>
            {
                Err(ConnectionError::Rejected(response.status()))
            }
            Err(e) => Err(ConnectionError::Other(anyhow::anyhow!(
                "Failed to connect to {}: {}",
                self.config.server_url,
                e
            ))),
        }
    }

    /// Upgrade request carrying the registration headers
    fn request(&self) -> Result<Request, ConnectionError> {
        let mut request = self
            .config
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(TOKEN_HEADER, header_value("token", &self.config.token)?);
        headers.insert(VERSION_HEADER, HeaderValue::from_static(PROTOCOL_VERSION));
        if let Some(node) = &self.config.node {
            headers.insert(NODE_HEADER, header_value("node", node)?);
        }
        Ok(request)
    }
}

fn header_value(what: &str, value: &str) -> Result<HeaderValue, ConnectionError> {
    HeaderValue::from_str(value)
        .map_err(|_| ConnectionError::InvalidRequest(format!("{} is not a valid header value", what)))
}

fn is_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}
