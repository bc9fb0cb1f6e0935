//! Logical stream identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one logical connection multiplexed over a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Create a new stream ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this is the session-level control stream
    pub fn is_control(&self) -> bool {
        *self == Self::CONTROL
    }

    /// Stream ID for control messages (heartbeats, session errors)
    pub const CONTROL: StreamId = StreamId(0);
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}
