//! Identity types for replicas and operations

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Per-session peer identity
///
/// Doubles as the CRDT actor id and as the key of the access-control table.
/// No identity beyond this random value is ever established.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh random peer id
    #[inline]
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters, for display
    #[must_use]
    pub fn short(&self, n: usize) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(n)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identity of a single operation: the issuing peer and its sequence number
///
/// Sequence numbers start at 1 and are contiguous per peer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpId {
    /// Issuing peer
    pub peer: PeerId,
    /// Per-peer sequence number
    pub seq: u64,
}

impl OpId {
    /// Create op id
    #[inline]
    #[must_use]
    pub fn new(peer: PeerId, seq: u64) -> Self {
        Self { peer, seq }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.seq, self.peer.short(8))
    }
}

/// Total order used for conflict resolution
///
/// Compares the Lamport time first, then the peer id. Wall-clock time plays
/// no part.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Lamport time of the operation
    pub lamport: u64,
    /// Issuing peer
    pub peer: PeerId,
}

impl Stamp {
    /// Create stamp
    #[inline]
    #[must_use]
    pub fn new(lamport: u64, peer: PeerId) -> Self {
        Self { lamport, peer }
    }
}
