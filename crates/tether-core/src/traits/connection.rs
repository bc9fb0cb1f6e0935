//! Connection and dialer traits

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::DialError;

/// A bidirectional byte stream handed to a dial's caller
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Conn for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned connection returned by every dialer.
///
/// Native dials yield TCP streams, tunneled dials an in-memory pipe bridged
/// onto the agent session; callers only see the byte stream. The caller
/// owns the connection and closes it by dropping it.
pub type BoxedConn = Box<dyn Conn>;

/// Something that can open a connection to `(network, address)`
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a connection.
    ///
    /// Cancelling `cancel` aborts an in-flight connect and releases
    /// anything acquired for it.
    async fn dial(
        &self,
        network: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError>;
}
