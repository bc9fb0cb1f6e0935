//! Local dials requested by the server

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use tether_core::config::AgentConfig;
use tether_core::{BoxedConn, DialError, Dialer};

/// Dials targets on the agent's host for the server's `Connect` requests
#[derive(Debug, Clone)]
pub struct LocalDialer {
    allowed_networks: Vec<String>,
    timeout: Duration,
}

impl LocalDialer {
    pub fn new(allowed_networks: Vec<String>, timeout: Duration) -> Self {
        Self {
            allowed_networks,
            timeout,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.allowed_networks.clone(), config.dial_timeout)
    }

    pub fn allows(&self, network: &str) -> bool {
        self.allowed_networks.iter().any(|n| n == network)
    }

    async fn connect(&self, network: &str, address: &str) -> Result<BoxedConn, DialError> {
        let conn: BoxedConn = match network {
            "tcp" | "tcp4" | "tcp6" => {
                let stream = TcpStream::connect(address).await?;
                let peer = stream.peer_addr()?;
                if (network == "tcp4" && !peer.is_ipv4()) || (network == "tcp6" && !peer.is_ipv6())
                {
                    return Err(DialError::ConnectFailed {
                        address: address.to_string(),
                        reason: format!("{} resolved to {}", network, peer),
                    });
                }
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
            #[cfg(unix)]
            "unix" => Box::new(tokio::net::UnixStream::connect(address).await?),
            #[cfg(windows)]
            "npipe" => Box::new(
                tokio::net::windows::named_pipe::ClientOptions::new().open(address)?,
            ),
            other => {
                return Err(DialError::Unsupported(format!(
                    "network {} on this platform",
                    other
                )))
            }
        };
        Ok(conn)
    }
}

impl Default for LocalDialer {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

#[async_trait]
impl Dialer for LocalDialer {
    async fn dial(
        &self,
        network: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError> {
        if !self.allows(network) {
            return Err(DialError::Unsupported(format!(
                "network {} is not allowed",
                network
            )));
        }

        tracing::debug!("local: dialing {}/{}", network, address);
        tokio::select! {
            _ = cancel.cancelled() => Err(DialError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.connect(network, address)) => match result {
                Ok(Ok(conn)) => Ok(conn),
                Ok(Err(DialError::Io(e))) => Err(DialError::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(DialError::Timeout {
                    address: address.to_string(),
                    timeout: self.timeout,
                }),
            },
        }
    }
}
