//! Tokio codec for framed protocol messages

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::Message;
use crate::stream::StreamId;

/// A complete frame: routing header plus decoded message
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Stream this frame belongs to
    pub stream_id: StreamId,
    /// The message payload
    pub message: Message,
}

impl Frame {
    pub fn new(stream_id: StreamId, message: Message) -> Self {
        Self { stream_id, message }
    }

    /// A frame on the control stream
    pub fn control(message: Message) -> Self {
        Self::new(StreamId::CONTROL, message)
    }

    /// Encode this frame into a fresh buffer
    pub fn to_bytes(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(self.clone(), &mut buf)?;
        Ok(buf)
    }
}

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Header decoded while waiting for the rest of its payload
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }

    /// Decode every frame contained in one transport message.
    ///
    /// Transport messages (WebSocket binary messages) carry whole frames,
    /// so a partial frame at the end is reported as an error.
    pub fn decode_all(&mut self, data: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        let mut buf = BytesMut::from(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.decode(&mut buf)? {
            frames.push(frame);
        }
        if self.pending_header.take().is_some() || !buf.is_empty() {
            return Err(ProtocolError::TrailingBytes(buf.len()));
        }
        Ok(frames)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if src.len() < payload_len {
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        let message: Message = bincode::deserialize(&payload)?;

        if message.message_type() != header.message_type {
            return Err(ProtocolError::TypeMismatch {
                header: header.message_type,
                payload: message.message_type(),
            });
        }

        Ok(Some(Frame {
            stream_id: header.stream_id,
            message,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&frame.message)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = FrameHeader::new(
            frame.stream_id,
            frame.message.message_type(),
            payload.len() as u32,
        );
        dst.reserve(header.frame_len());
        header.encode(dst);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use bytes::Bytes;

    #[test]
    fn test_decode_waits_for_full_payload() {
        let frame = Frame::new(
            StreamId::new(7),
            Message::Connect {
                network: "tcp".to_string(),
                address: "10.0.0.7:6443".to_string(),
            },
        );
        let encoded = frame.to_bytes().unwrap();

        let mut codec = FrameCodec::new();
        let mut partial = BytesMut::from(&encoded[..encoded.len() - 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&encoded[encoded.len() - 3..]);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_all_multiple_frames() {
        let mut buf = BytesMut::new();
        let mut codec = FrameCodec::new();
        codec
            .encode(Frame::new(StreamId::new(1), Message::Connected), &mut buf)
            .unwrap();
        codec
            .encode(
                Frame::new(StreamId::new(1), Message::Data(Bytes::from_static(b"ping"))),
                &mut buf,
            )
            .unwrap();

        let frames = FrameCodec::new().decode_all(&buf).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].message, Message::Connected);
        assert_eq!(frames[1].message, Message::Data(Bytes::from_static(b"ping")));
    }

    #[test]
    fn test_decode_all_rejects_truncated_message() {
        let encoded = Frame::control(Message::Heartbeat { timestamp: 9 })
            .to_bytes()
            .unwrap();
        let result = FrameCodec::new().decode_all(&encoded[..encoded.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::TrailingBytes(_))));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut encoded = Frame::new(StreamId::new(3), Message::Connected)
            .to_bytes()
            .unwrap();
        encoded[4] = MessageType::Data.as_u8();
        let result = FrameCodec::new().decode(&mut encoded);
        assert!(matches!(result, Err(ProtocolError::TypeMismatch { .. })));
    }
}
