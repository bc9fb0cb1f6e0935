//! Server side of one agent session
//!
//! A `TunnelSession` owns the stream table of a single reverse transport.
//! Frames read from the agent are fed to [`TunnelSession::handle_frame`];
//! frames for the agent are queued on the outbound channel, drained by the
//! transport's writer loop.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tether_core::time::{current_time_millis, elapsed_since};
use tether_core::{BoxedConn, DialError, SessionKey};
use tether_protocol::{bridge, ErrorCode, Frame, Message, StreamId};

/// Capacity of the outbound frame queue shared by all streams of a session
pub const OUTBOUND_QUEUE: usize = 256;

/// Inbound `Data` payloads buffered per stream
const STREAM_QUEUE: usize = 64;

/// Close reason sent when a stream's inbound buffer overflows
const OVERFLOW_REASON: &str = "receive buffer overflow";

/// Buffer size of the in-memory pipe handed to callers
const PIPE_BUFFER: usize = 64 * 1024;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

type ConnectResult = Result<(), String>;

/// Per-stream state
struct StreamSlot {
    /// Present until the agent answers the `Connect`
    pending: Option<oneshot::Sender<ConnectResult>>,
    /// Payloads for the stream's bridge
    data_tx: mpsc::Sender<Bytes>,
}

/// Transport registered under a session key
pub struct TunnelSession {
    instance: u64,
    key: SessionKey,
    outbound: mpsc::Sender<Frame>,
    streams: DashMap<StreamId, StreamSlot>,
    next_stream_id: AtomicU32,
    cancel: CancellationToken,
    closed: AtomicBool,
    last_seen: AtomicU64,
}

impl TunnelSession {
    /// Create a session and the receiving end of its outbound queue
    pub fn new(key: SessionKey) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let session = Arc::new(Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            key,
            outbound,
            streams: DashMap::new(),
            // 0 is reserved for control
            next_stream_id: AtomicU32::new(1),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            last_seen: AtomicU64::new(current_time_millis()),
        });
        (session, outbound_rx)
    }

    /// Process-unique identity of this transport
    pub fn instance_id(&self) -> u64 {
        self.instance
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when the session closes
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of streams currently pending or established
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Record traffic from the agent
    pub fn touch(&self) {
        self.last_seen.store(current_time_millis(), Ordering::Relaxed);
    }

    /// Whether the agent has been silent for longer than `timeout`
    pub fn is_stale(&self, timeout: Duration) -> bool {
        elapsed_since(self.last_seen.load(Ordering::Relaxed)) > timeout
    }

    /// Close the session.
    ///
    /// Pending dials observe `SessionGone`, established streams are torn
    /// down. Returns `false` if the session was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        self.streams.clear();
        tracing::debug!("Session {} (#{}) closed", self.key, self.instance);
        true
    }

    /// Queue a frame for the agent
    pub async fn send(&self, frame: Frame) -> Result<(), DialError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| DialError::SessionGone(self.key.clone()))
    }

    fn allocate_stream_id(&self) -> StreamId {
        StreamId::new(self.next_stream_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Open a logical connection to `(network, address)` on the agent side.
    ///
    /// Waits at most `timeout` for the agent to confirm. The returned
    /// connection is an in-memory pipe bridged onto the new stream.
    pub async fn dial(
        self: &Arc<Self>,
        network: &str,
        address: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError> {
        if self.is_closed() {
            return Err(DialError::SessionGone(self.key.clone()));
        }

        let stream_id = self.allocate_stream_id();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (data_tx, data_rx) = mpsc::channel(STREAM_QUEUE);
        self.streams.insert(
            stream_id,
            StreamSlot {
                pending: Some(ready_tx),
                data_tx,
            },
        );
        let mut guard = PendingStream {
            session: self,
            stream_id,
            armed: true,
        };

        // A close racing the insert above would leave the slot behind
        if self.is_closed() {
            return Err(DialError::SessionGone(self.key.clone()));
        }

        tracing::debug!(
            "Session {}: opening {} to {}/{}",
            self.key,
            stream_id,
            network,
            address
        );

        let connect = Frame::new(
            stream_id,
            Message::Connect {
                network: network.to_string(),
                address: address.to_string(),
            },
        );
        let confirmed = async {
            self.send(connect).await?;
            match ready_rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(DialError::ConnectFailed {
                    address: address.to_string(),
                    reason,
                }),
                Err(_) => Err(DialError::SessionGone(self.key.clone())),
            }
        };

        tokio::select! {
            result = confirmed => result?,
            _ = self.cancel.cancelled() => {
                return Err(DialError::SessionGone(self.key.clone()));
            }
            _ = cancel.cancelled() => return Err(DialError::Cancelled),
            _ = tokio::time::sleep(timeout) => {
                return Err(DialError::Timeout {
                    address: address.to_string(),
                    timeout,
                });
            }
        }

        guard.armed = false;

        let (local, remote) = tokio::io::duplex(PIPE_BUFFER);
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let stats = bridge(
                remote,
                stream_id,
                data_rx,
                session.outbound.clone(),
                session.cancel.clone(),
            )
            .await;
            session.streams.remove(&stream_id);
            tracing::debug!(
                "Session {}: {} finished (sent {} bytes, received {} bytes)",
                session.key,
                stream_id,
                stats.sent,
                stats.received
            );
        });

        Ok(Box::new(local))
    }

    /// Dispatch one frame received from the agent
    pub async fn handle_frame(&self, frame: Frame) {
        self.touch();
        let Frame { stream_id, message } = frame;

        match message {
            Message::Connected => {
                let pending = self
                    .streams
                    .get_mut(&stream_id)
                    .and_then(|mut slot| slot.pending.take());
                match pending {
                    Some(tx) => {
                        let _ = tx.send(Ok(()));
                    }
                    None => {
                        tracing::debug!(
                            "Session {}: unexpected Connected for {}",
                            self.key,
                            stream_id
                        );
                    }
                }
            }

            Message::Data(data) => {
                let tx = self.streams.get(&stream_id).map(|slot| slot.data_tx.clone());
                match tx {
                    Some(tx) => match tx.try_send(data) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // The reader is shared by every stream; never wait on one of them
                            tracing::warn!(
                                "Session {}: {} is not draining, resetting it",
                                self.key,
                                stream_id
                            );
                            self.streams.remove(&stream_id);
                            let _ = self
                                .outbound
                                .try_send(Frame::new(stream_id, Message::close_with(OVERFLOW_REASON)));
                        }
                        Err(TrySendError::Closed(_)) => {
                            self.streams.remove(&stream_id);
                        }
                    },
                    None => {
                        tracing::trace!(
                            "Session {}: dropping {} bytes for unknown {}",
                            self.key,
                            data.len(),
                            stream_id
                        );
                    }
                }
            }

            Message::Close { reason } => {
                self.finish_stream(
                    stream_id,
                    reason.unwrap_or_else(|| "closed by agent".to_string()),
                );
            }

            Message::Error { code, message } if !stream_id.is_control() => {
                tracing::debug!(
                    "Session {}: agent reported {:?} on {}: {}",
                    self.key,
                    code,
                    stream_id,
                    message
                );
                self.finish_stream(stream_id, message);
            }

            Message::Error { code, message } => {
                tracing::warn!("Session {}: agent error {:?}: {}", self.key, code, message);
            }

            Message::Heartbeat { timestamp } => {
                let _ = self
                    .outbound
                    .send(Frame::control(Message::HeartbeatAck { timestamp }))
                    .await;
            }

            Message::HeartbeatAck { timestamp } => {
                let latency = current_time_millis().saturating_sub(timestamp);
                tracing::trace!("Heartbeat ack from {}, latency={}ms", self.key, latency);
            }

            Message::Connect { .. } => {
                tracing::warn!(
                    "Session {}: agent tried to open {}, refusing",
                    self.key,
                    stream_id
                );
                let _ = self
                    .outbound
                    .send(Frame::new(
                        stream_id,
                        Message::Error {
                            code: ErrorCode::InvalidMessage,
                            message: "agents cannot open streams".to_string(),
                        },
                    ))
                    .await;
            }
        }
    }

    /// Drop a stream's slot; a pending dial fails with `reason`
    fn finish_stream(&self, stream_id: StreamId, reason: String) {
        if let Some((_, slot)) = self.streams.remove(&stream_id) {
            if let Some(tx) = slot.pending {
                let _ = tx.send(Err(reason));
            }
        }
    }
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("instance", &self.instance)
            .field("key", &self.key)
            .field("streams", &self.streams.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Releases the slot of a dial that never completed
struct PendingStream<'a> {
    session: &'a TunnelSession,
    stream_id: StreamId,
    armed: bool,
}

impl Drop for PendingStream<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.session.streams.remove(&self.stream_id).is_some() && !self.session.is_closed() {
            // Best effort; the agent also drops the stream when its Connected goes unanswered
            let _ = self
                .session
                .outbound
                .try_send(Frame::new(self.stream_id, Message::close_with("dial abandoned")));
        }
    }
}
