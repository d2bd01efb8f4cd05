//! Frames exchanged between providers over a relay
//!
//! The relay treats payloads as opaque strings; only providers decode them.

use crate::awareness::PresenceUser;
use crate::error::TransportError;
use scaffold_crdt::{StateVector, Update};
use serde::{Deserialize, Serialize};

/// Provider-to-provider message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// "Here is what I have; send me what I lack"
    SyncStep1 {
        /// Sender's state vector
        state_vector: StateVector,
    },
    /// Answer to [`Frame::SyncStep1`]
    SyncStep2 {
        /// Ops the requester lacks
        update: Update,
    },
    /// Incremental update produced by a local transaction
    Update {
        /// The batch
        update: Update,
    },
    /// Awareness state of the sending connection
    Awareness {
        /// Sender's awareness clock
        clock: u64,
        /// `None` withdraws the sender's entry
        user: Option<PresenceUser>,
    },
}

impl Frame {
    /// Short name for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncStep1 { .. } => "sync_step1",
            Self::SyncStep2 { .. } => "sync_step2",
            Self::Update { .. } => "update",
            Self::Awareness { .. } => "awareness",
        }
    }

    /// Encode as a relay payload
    ///
    /// # Errors
    /// Returns [`TransportError::Codec`] if serialization fails
    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a relay payload
    ///
    /// # Errors
    /// Returns [`TransportError::Codec`] for malformed payloads
    pub fn decode(payload: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(payload)?)
    }
}
