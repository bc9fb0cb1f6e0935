//! tether-protocol: Wire protocol for tether reverse tunnels
//!
//! This crate defines the binary protocol spoken between the tunnel server
//! and remote agents. Many logical byte streams are multiplexed over one
//! agent session; each stream is opened with `Connect`, carries `Data`, and
//! ends with `Close`.

pub mod bridge;
pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod stream;

pub use bridge::{bridge, BridgeStats, BRIDGE_CHUNK_SIZE};
pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{ErrorCode, Message, MessageType, PROTOCOL_VERSION};
pub use stream::StreamId;
