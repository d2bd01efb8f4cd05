//! Transport errors
//!
//! None of these reach the user: the provider logs them and degrades to
//! lone-peer operation.

use crate::room::{ConnectionId, RoomToken};

/// Transport error
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Relay cannot be reached
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// Connection is not a member of the room
    #[error("connection {conn} is not in room {room}")]
    NotJoined {
        /// Room addressed
        room: RoomToken,
        /// Sender
        conn: ConnectionId,
    },

    /// Channel to the relay or pump closed
    #[error("channel closed")]
    ChannelClosed,

    /// Frame could not be encoded or decoded
    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Socket error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether reconnecting later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RelayUnavailable(_) | Self::ChannelClosed | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransportError::RelayUnavailable("down".into()).is_retryable());
        assert!(TransportError::ChannelClosed.is_retryable());
        let codec: TransportError = serde_json::from_str::<u8>("x").unwrap_err().into();
        assert!(!codec.is_retryable());
    }
}
