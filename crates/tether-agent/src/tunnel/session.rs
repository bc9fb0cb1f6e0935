//! Agent side of a tunnel session
//!
//! The server opens streams with `Connect`; the agent dials the target
//! locally, answers `Connected` (or `Close` with the failure), and bridges
//! the local connection onto the stream until either side finishes.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use tether_core::{BoxedConn, DialError, Dialer};
use tether_protocol::{bridge, ErrorCode, Frame, FrameCodec, Message, StreamId};

use super::connector::AgentSocket;

/// Frames queued for the server before local readers are held back
const OUTBOUND_QUEUE: usize = 256;

/// Inbound payloads buffered per stream
const STREAM_QUEUE: usize = 64;

/// Close reason sent when a stream's inbound buffer overflows
const OVERFLOW_REASON: &str = "receive buffer overflow";

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The agent is shutting down
    Cancelled,
    /// Close frame or EOF from the server
    ServerClosed,
    TransportError(String),
    ProtocolError(String),
}

enum StreamState {
    /// Local dial in flight; cancelling abandons it
    Dialing(CancellationToken),
    /// Bridged; dropping the sender ends the local side
    Open(mpsc::Sender<Bytes>),
}

enum StreamEvent {
    Dialed {
        stream_id: StreamId,
        address: String,
        result: Result<BoxedConn, DialError>,
    },
    Finished(StreamId),
}

struct AgentTunnel {
    dialer: Arc<dyn Dialer>,
    outbound: mpsc::Sender<Frame>,
    events: mpsc::Sender<StreamEvent>,
    streams: HashMap<StreamId, StreamState>,
    cancel: CancellationToken,
}

impl AgentTunnel {
    async fn send(&self, frame: Frame) {
        if self.outbound.send(frame).await.is_err() {
            tracing::debug!("Outbound queue closed, dropping frame");
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        let Frame { stream_id, message } = frame;

        match message {
            Message::Connect { network, address } if !stream_id.is_control() => {
                self.start_dial(stream_id, network, address).await;
            }

            Message::Data(data) => {
                let tx = match self.streams.get(&stream_id) {
                    Some(StreamState::Open(tx)) => tx.clone(),
                    _ => {
                        tracing::trace!("Dropping {} bytes for unknown {}", data.len(), stream_id);
                        return;
                    }
                };
                match tx.try_send(data) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        // Frames for every stream share this reader; reset the slow one
                        tracing::warn!("{}: local side is not draining, resetting", stream_id);
                        self.streams.remove(&stream_id);
                        if self
                            .outbound
                            .try_send(Frame::new(stream_id, Message::close_with(OVERFLOW_REASON)))
                            .is_err()
                        {
                            tracing::debug!("Outbound queue full, {} reset not reported", stream_id);
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.streams.remove(&stream_id);
                    }
                }
            }

            Message::Close { reason } => {
                if let Some(reason) = reason {
                    tracing::debug!("Server closed {}: {}", stream_id, reason);
                }
                self.drop_stream(stream_id);
            }

            Message::Heartbeat { timestamp } => {
                self.send(Frame::new(stream_id, Message::HeartbeatAck { timestamp }))
                    .await;
            }

            Message::HeartbeatAck { .. } => {}

            Message::Error { code, message } => {
                tracing::warn!("Server reported {:?} on {}: {}", code, stream_id, message);
                if !stream_id.is_control() {
                    self.drop_stream(stream_id);
                }
            }

            other => {
                tracing::warn!("Unexpected {:?} from server on {}", other.message_type(), stream_id);
                self.send(Frame::new(
                    stream_id,
                    Message::Error {
                        code: ErrorCode::InvalidMessage,
                        message: format!("{:?} is not valid here", other.message_type()),
                    },
                ))
                .await;
            }
        }
    }

    async fn start_dial(&mut self, stream_id: StreamId, network: String, address: String) {
        if self.streams.contains_key(&stream_id) {
            self.send(Frame::new(
                stream_id,
                Message::Error {
                    code: ErrorCode::InvalidMessage,
                    message: format!("{} is already open", stream_id),
                },
            ))
            .await;
            return;
        }

        tracing::debug!("{}: server requested {}/{}", stream_id, network, address);
        let token = self.cancel.child_token();
        self.streams
            .insert(stream_id, StreamState::Dialing(token.clone()));

        let dialer = Arc::clone(&self.dialer);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = dialer.dial(&network, &address, &token).await;
            let _ = events
                .send(StreamEvent::Dialed {
                    stream_id,
                    address,
                    result,
                })
                .await;
        });
    }

    async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Dialed {
                stream_id,
                address,
                result,
            } => {
                if !matches!(self.streams.get(&stream_id), Some(StreamState::Dialing(_))) {
                    tracing::debug!("{}: dial to {} abandoned by server", stream_id, address);
                    return;
                }

                let conn = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("{}: dial to {} failed: {}", stream_id, address, e);
                        self.streams.remove(&stream_id);
                        self.send(Frame::new(stream_id, Message::close_with(e.to_string())))
                            .await;
                        return;
                    }
                };

                let (data_tx, data_rx) = mpsc::channel(STREAM_QUEUE);
                self.streams.insert(stream_id, StreamState::Open(data_tx));
                // Connected is queued ahead of any Data the bridge produces
                self.send(Frame::new(stream_id, Message::Connected)).await;

                let outbound = self.outbound.clone();
                let events = self.events.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    let stats = bridge(conn, stream_id, data_rx, outbound, cancel).await;
                    tracing::debug!(
                        "{}: {} finished ({} bytes out, {} bytes in)",
                        stream_id,
                        address,
                        stats.sent,
                        stats.received
                    );
                    let _ = events.send(StreamEvent::Finished(stream_id)).await;
                });
            }

            StreamEvent::Finished(stream_id) => {
                self.streams.remove(&stream_id);
            }
        }
    }

    fn drop_stream(&mut self, stream_id: StreamId) {
        if let Some(StreamState::Dialing(token)) = self.streams.remove(&stream_id) {
            token.cancel();
        }
    }
}

/// Serve one established transport until it closes or `cancel` fires
pub async fn run_session(
    socket: AgentSocket,
    dialer: Arc<dyn Dialer>,
    cancel: &CancellationToken,
) -> DisconnectReason {
    let session_cancel = cancel.child_token();
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
    let (events_tx, mut events_rx) = mpsc::channel::<StreamEvent>(OUTBOUND_QUEUE);

    let writer = {
        let cancel = session_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let bytes = match frame.to_bytes() {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                tracing::error!("Failed to encode frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::Binary(bytes.to_vec())).await {
                            tracing::debug!("Write to server failed: {}", e);
                            break;
                        }
                    }
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        })
    };

    let mut tunnel = AgentTunnel {
        dialer,
        outbound: outbound_tx,
        events: events_tx,
        streams: HashMap::new(),
        cancel: session_cancel.clone(),
    };

    let mut codec = FrameCodec::new();
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break DisconnectReason::Cancelled,
            Some(event) = events_rx.recv() => tunnel.handle_event(event).await,
            message = stream.next() => match message {
                Some(Ok(WsMessage::Binary(data))) => match codec.decode_all(&data) {
                    Ok(frames) => {
                        for frame in frames {
                            tunnel.handle_frame(frame).await;
                        }
                    }
                    Err(e) => break DisconnectReason::ProtocolError(e.to_string()),
                },
                Some(Ok(WsMessage::Close(_))) | None => break DisconnectReason::ServerClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => break DisconnectReason::TransportError(e.to_string()),
            },
        }
    };

    tracing::debug!("Closing {} streams", tunnel.streams.len());
    session_cancel.cancel();
    tunnel.streams.clear();
    let _ = writer.await;
    reason
}
