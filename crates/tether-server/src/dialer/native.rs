//! Direct OS dials

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use tether_core::config::DialTimeouts;
use tether_core::{BoxedConn, DialError, Dialer};

/// Plain TCP dialer with a connect timeout and keep-alive
#[derive(Debug, Clone, Copy)]
pub struct NativeDialer {
    connect_timeout: Duration,
    keepalive: Duration,
}

impl Default for NativeDialer {
    fn default() -> Self {
        Self::from_timeouts(&DialTimeouts::default())
    }
}

impl NativeDialer {
    pub fn new(connect_timeout: Duration, keepalive: Duration) -> Self {
        Self {
            connect_timeout,
            keepalive,
        }
    }

    pub fn from_timeouts(timeouts: &DialTimeouts) -> Self {
        Self::new(timeouts.native_connect, timeouts.native_keepalive)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect to `address`, trying each resolved address in turn
    pub async fn connect_tcp(
        &self,
        network: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<TcpStream, DialError> {
        let family: fn(&SocketAddr) -> bool = match network {
            "tcp" => any_family,
            "tcp4" => SocketAddr::is_ipv4,
            "tcp6" => SocketAddr::is_ipv6,
            other => {
                return Err(DialError::Unsupported(format!(
                    "network {} for a direct dial",
                    other
                )))
            }
        };

        let connect = connect_any(network, address, family);

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(DialError::Cancelled),
            result = tokio::time::timeout(self.connect_timeout, connect) => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(DialError::ConnectFailed {
                        address: address.to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(DialError::Timeout {
                        address: address.to_string(),
                        timeout: self.connect_timeout,
                    })
                }
            },
        };

        let keepalive = TcpKeepalive::new().with_time(self.keepalive);
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        stream.set_nodelay(true)?;

        Ok(stream)
    }
}

fn any_family(_: &SocketAddr) -> bool {
    true
}

/// Try every resolved address of the requested family in order
async fn connect_any(
    network: &str,
    address: &str,
    family: fn(&SocketAddr) -> bool,
) -> io::Result<TcpStream> {
    let mut last_error: Option<io::Error> = None;
    for addr in tokio::net::lookup_host(address).await?.filter(family) {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("native: connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {} address for {}", network, address),
        )
    }))
}

#[async_trait]
impl Dialer for NativeDialer {
    async fn dial(
        &self,
        network: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError> {
        tracing::debug!("native: dialing {}/{}", network, address);
        let stream = self.connect_tcp(network, address, cancel).await?;
        Ok(Box::new(stream))
    }
}
