//! Operations, updates and state vectors exchanged between replicas

use crate::error::DocError;
use crate::graph::CausalGraph;
use crate::id::{OpId, PeerId, Stamp};
use crate::text::TextOp;
use crdts::{CmRDT, Dot, VClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Admission status stored in the access-control map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    /// The only admitting state
    Allowed,
}

/// The three replicated fields of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Shared free-text research input
    SharedInput,
    /// Single-entry map holding the graph snapshot
    SharedGraph,
    /// Peer id to admission status
    AccessControl,
}

/// Payload of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpKind {
    /// Insert or delete one character of the shared input
    Text {
        /// Sequence operation
        op: TextOp,
    },
    /// Replace the graph snapshot under `key`
    GraphSet {
        /// Map key, `"data"` in practice
        key: String,
        /// New snapshot; `None` clears the graph
        value: Option<Arc<CausalGraph>>,
    },
    /// Upsert an access-control entry
    AccessSet {
        /// Peer being admitted
        peer: PeerId,
        /// New status
        status: AccessStatus,
    },
}

impl OpKind {
    /// Field this operation mutates
    #[must_use]
    pub fn field(&self) -> Field {
        match self {
            Self::Text { .. } => Field::SharedInput,
            Self::GraphSet { .. } => Field::SharedGraph,
            Self::AccessSet { .. } => Field::AccessControl,
        }
    }
}

/// A single replicated operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    /// Issuer and per-issuer sequence number
    pub id: OpId,
    /// Lamport time at generation
    pub lamport: u64,
    /// What the operation does
    pub kind: OpKind,
}

impl Op {
    /// Conflict-resolution stamp
    #[inline]
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.lamport, self.id.peer.clone())
    }
}

/// A batch of operations
///
/// Incremental deltas and full-state snapshots share this type; applying
/// either goes through the same merge path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Operations, grouped by issuer in sequence order
    pub ops: Vec<Op>,
}

impl Update {
    /// Empty update
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the update carries nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Encode as JSON bytes
    ///
    /// # Errors
    /// Returns [`DocError::Codec`] if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>, DocError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes
    ///
    /// # Errors
    /// Returns [`DocError::Codec`] on malformed input
    pub fn decode(bytes: &[u8]) -> Result<Self, DocError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Highest contiguous sequence number applied per peer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    clock: VClock<PeerId>,
}

impl StateVector {
    /// Empty state vector; asking for a diff against it yields full state
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number covered for `peer`
    #[inline]
    #[must_use]
    pub fn get(&self, peer: &PeerId) -> u64 {
        self.clock.get(peer)
    }

    /// Whether `id` is already covered
    #[inline]
    #[must_use]
    pub fn covers(&self, id: &OpId) -> bool {
        self.clock.get(&id.peer) >= id.seq
    }

    /// Whether every op covered by `other` is covered here too
    #[must_use]
    pub fn includes(&self, other: &StateVector) -> bool {
        other.iter().all(|(peer, seq)| self.get(peer) >= seq)
    }

    /// Record `id` as applied
    pub(crate) fn advance(&mut self, id: &OpId) {
        self.clock.apply(Dot::new(id.peer.clone(), id.seq));
    }

    /// Peers and their covered sequence numbers
    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, u64)> {
        self.clock.dots.iter().map(|(peer, seq)| (peer, *seq))
    }
}
