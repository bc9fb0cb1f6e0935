//! Bridging a local byte stream onto a tunnel stream
//!
//! Both ends of a tunnel run the same loop for every established stream:
//! bytes read from the local side become `Data` frames, inbound `Data`
//! payloads are written to the local side, and either side finishing ends
//! the stream.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::Frame;
use crate::message::Message;
use crate::stream::StreamId;

/// Read buffer size for one bridge direction.
///
/// Kept well below `MAX_PAYLOAD_SIZE` so a single stream cannot hog the
/// session's outbound queue with oversized frames.
pub const BRIDGE_CHUNK_SIZE: usize = 32 * 1024;

/// Byte counters reported when a bridge finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Bytes read from the local stream and sent into the tunnel
    pub sent: u64,
    /// Bytes received from the tunnel and written to the local stream
    pub received: u64,
}

/// Run a bridge until either side closes.
///
/// * `inbound` yields payloads of `Data` frames addressed to `stream_id`;
///   the peer closing the stream is signalled by dropping its sender.
/// * `outbound` is the session's frame queue.
/// * `cancel` is the session token; once cancelled the bridge stops without
///   emitting `Close`, because the session itself is gone.
///
/// A `Close` frame is sent when the local side reaches EOF or fails.
pub async fn bridge<S>(
    stream: S,
    stream_id: StreamId,
    mut inbound: mpsc::Receiver<Bytes>,
    outbound: mpsc::Sender<Frame>,
    cancel: CancellationToken,
) -> BridgeStats
where
    S: AsyncRead + AsyncWrite + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; BRIDGE_CHUNK_SIZE];
    let mut stats = BridgeStats::default();
    let mut close_reason: Option<String> = None;
    let mut notify_peer = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                notify_peer = false;
                break;
            }

            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::trace!("{}: local side reached EOF", stream_id);
                    break;
                }
                Ok(n) => {
                    let frame = Frame::new(stream_id, Message::Data(Bytes::copy_from_slice(&buf[..n])));
                    if outbound.send(frame).await.is_err() {
                        notify_peer = false;
                        break;
                    }
                    stats.sent += n as u64;
                }
                Err(e) => {
                    tracing::debug!("{}: local read failed: {}", stream_id, e);
                    close_reason = Some(e.to_string());
                    break;
                }
            },

            chunk = inbound.recv() => match chunk {
                Some(data) => {
                    let written = async {
                        writer.write_all(&data).await?;
                        writer.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        tracing::debug!("{}: local write failed: {}", stream_id, e);
                        close_reason = Some(e.to_string());
                        break;
                    }
                    stats.received += data.len() as u64;
                }
                None => {
                    tracing::trace!("{}: peer closed the stream", stream_id);
                    notify_peer = false;
                    let _ = writer.shutdown().await;
                    break;
                }
            },
        }
    }

    if notify_peer {
        let _ = outbound
            .send(Frame::new(stream_id, Message::Close { reason: close_reason }))
            .await;
    }

    stats
}
