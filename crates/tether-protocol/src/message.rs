//! Message types for the tether tunnel protocol
//!
//! # Stream lifecycle
//!
//! 1. The server allocates a stream ID and sends `Connect { network, address }`
//! 2. The agent dials the target locally and answers `Connected`, or
//!    `Close { reason }` when the local dial fails
//! 3. `Data` frames flow in both directions
//! 4. Either side ends the stream with `Close`
//!
//! Heartbeats travel on the control stream (`StreamId::CONTROL`).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Current protocol version string, announced by agents at registration.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type identifier carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Open a logical connection on the agent side
    Connect = 0x01,
    /// The agent's local dial succeeded
    Connected = 0x02,
    /// Stream payload
    Data = 0x03,
    /// Tear a stream down
    Close = 0x04,
    /// Heartbeat ping
    Heartbeat = 0x05,
    /// Heartbeat acknowledgment
    HeartbeatAck = 0x06,
    /// Error report
    Error = 0xFF,
}

impl MessageType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Connect),
            0x02 => Some(Self::Connected),
            0x03 => Some(Self::Data),
            0x04 => Some(Self::Close),
            0x05 => Some(Self::Heartbeat),
            0x06 => Some(Self::HeartbeatAck),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 0,
    /// Frame referenced a stream the receiver does not know
    StreamNotFound = 1,
    /// Message not valid in the current direction or state
    InvalidMessage = 2,
    /// Requested network is not served by this agent
    NetworkNotAllowed = 3,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Ask the agent to open a connection to `address` over `network`
    Connect {
        /// Network kind, e.g. "tcp", "unix", "npipe"
        network: String,
        /// Target address, "host:port" or a socket path
        address: String,
    },

    /// Local dial on the agent succeeded
    Connected,

    /// Stream payload
    Data(Bytes),

    /// Close the stream
    Close {
        /// Why the stream ended; `None` for an orderly close
        reason: Option<String>,
    },

    /// Heartbeat ping
    Heartbeat {
        /// Sender's clock in milliseconds since the UNIX epoch
        timestamp: u64,
    },

    /// Heartbeat acknowledgment
    HeartbeatAck {
        /// Echo of the original timestamp
        timestamp: u64,
    },

    /// Error report
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Connect { .. } => MessageType::Connect,
            Message::Connected => MessageType::Connected,
            Message::Data(_) => MessageType::Data,
            Message::Close { .. } => MessageType::Close,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::HeartbeatAck { .. } => MessageType::HeartbeatAck,
            Message::Error { .. } => MessageType::Error,
        }
    }

    /// Shorthand for an orderly close
    pub fn close() -> Self {
        Message::Close { reason: None }
    }

    /// Shorthand for a close carrying a failure reason
    pub fn close_with(reason: impl Into<String>) -> Self {
        Message::Close {
            reason: Some(reason.into()),
        }
    }
}
