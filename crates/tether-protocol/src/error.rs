//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding tunnel frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Invalid frame header
    #[error("Invalid frame header")]
    InvalidHeader,

    /// Unknown message type
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Header announced one message type but the payload decoded as another
    #[error("Message type mismatch: header says {header:?}, payload is {payload:?}")]
    TypeMismatch {
        header: crate::message::MessageType,
        payload: crate::message::MessageType,
    },

    /// Bytes left over after the last complete frame of a transport message
    #[error("Trailing bytes after frame: {0}")]
    TrailingBytes(usize),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
