//! Roster and pending-admission derivation
//!
//! Both are recomputed from scratch on every awareness or access-table
//! tick. Nothing here is stored or replicated.

use scaffold_crdt::PeerId;
use scaffold_net::{ConnectionId, PresenceEntry};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// One connected client as shown in the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    /// Owning connection
    pub connection: ConnectionId,
    /// Peer id
    pub peer_id: PeerId,
    /// Display name
    pub name: String,
    /// Colour tag
    pub color: String,
    /// Whether the access table admits this peer
    pub admitted: bool,
    /// Whether this is the local connection
    pub is_self: bool,
}

/// A present peer nobody has admitted yet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PendingRequest {
    /// Peer awaiting admission
    pub peer_id: PeerId,
    /// Its display name
    pub name: String,
}

/// Build the roster from presence entries and the admitted set
#[must_use]
pub fn build_roster(
    entries: &[PresenceEntry],
    allowed: &BTreeSet<PeerId>,
    local: ConnectionId,
) -> Vec<RosterEntry> {
    entries
        .iter()
        .map(|entry| RosterEntry {
            connection: entry.connection,
            peer_id: entry.user.peer_id.clone(),
            name: entry.user.name.clone(),
            color: entry.user.color.clone(),
            admitted: allowed.contains(&entry.user.peer_id),
            is_self: entry.connection == local,
        })
        .collect()
}

/// Present peers without an `Allowed` entry, deduplicated, excluding `local`
///
/// A peer with two tabs open shows up once.
#[must_use]
pub fn pending_requests(
    entries: &[PresenceEntry],
    allowed: &BTreeSet<PeerId>,
    local: &PeerId,
) -> Vec<PendingRequest> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|e| &e.user.peer_id != local && !allowed.contains(&e.user.peer_id))
        .filter(|e| seen.insert(e.user.peer_id.clone()))
        .map(|e| PendingRequest {
            peer_id: e.user.peer_id.clone(),
            name: e.user.name.clone(),
        })
        .collect()
}

/// Deterministic palette pick for `peer`
#[must_use]
pub fn color_for(peer: &PeerId, palette: &[String]) -> String {
    if palette.is_empty() {
        return String::from("#64748b");
    }
    // FNV-1a
    let hash = peer
        .as_str()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
    let index = usize::try_from(hash % palette.len() as u64).unwrap_or(0);
    palette[index].clone()
}

/// Fallback display name
#[must_use]
pub fn default_name(peer: &PeerId) -> String {
    format!("Researcher {}", peer.short(4))
}
