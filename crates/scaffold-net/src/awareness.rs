//! Ephemeral presence state, one entry per live connection
//!
//! Awareness is not part of the replicated document. Entries are last-write
//! -wins by a per-connection clock and vanish when their connection leaves.
//! The last clock of a vanished entry is remembered, so a frame that was in
//! flight when the connection left cannot bring the entry back.

use crate::room::ConnectionId;
use parking_lot::Mutex;
use scaffold_crdt::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity a peer advertises while connected
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresenceUser {
    /// Document peer id
    pub peer_id: PeerId,
    /// Display name
    pub name: String,
    /// Colour tag (CSS hex)
    pub color: String,
}

impl PresenceUser {
    /// Create a presence record
    #[inline]
    #[must_use]
    pub fn new(peer_id: PeerId, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
            color: color.into(),
        }
    }
}

/// One connection's awareness state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Owning connection
    pub connection: ConnectionId,
    /// Last clock seen from that connection
    pub clock: u64,
    /// Advertised user
    pub user: PresenceUser,
}

/// Which connections changed in one awareness tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwarenessChange {
    /// Newly seen connections
    pub added: Vec<ConnectionId>,
    /// Connections whose state changed
    pub updated: Vec<ConnectionId>,
    /// Connections that went away or cleared their state
    pub removed: Vec<ConnectionId>,
}

impl AwarenessChange {
    /// Whether nothing changed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Handle returned by [`Awareness::on_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AwarenessSubscription(u64);

type ChangeCallback = Arc<dyn Fn(&Awareness, &AwarenessChange) + Send + Sync>;
pub(crate) type LocalCallback = Arc<dyn Fn(u64, Option<&PresenceUser>) + Send + Sync>;

#[derive(Debug, Default)]
struct Table {
    live: BTreeMap<ConnectionId, PresenceEntry>,
    departed: BTreeMap<ConnectionId, u64>,
}

impl Table {
    fn depart(&mut self, conn: ConnectionId) -> bool {
        match self.live.remove(&conn) {
            Some(entry) => {
                let last = self.departed.entry(conn).or_default();
                *last = (*last).max(entry.clock);
                true
            }
            None => false,
        }
    }
}

/// Awareness state of every connection in the room, as seen locally
pub struct Awareness {
    local: ConnectionId,
    states: Mutex<Table>,
    local_clock: AtomicU64,
    listeners: Mutex<Vec<(u64, ChangeCallback)>>,
    broadcasters: Mutex<Vec<(u64, LocalCallback)>>,
    next_sub: AtomicU64,
}

impl std::fmt::Debug for Awareness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awareness")
            .field("local", &self.local)
            .field("states", &self.states.lock().live.len())
            .field("clock", &self.local_clock.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Awareness {
    /// Awareness for the local connection `local`
    #[must_use]
    pub fn new(local: ConnectionId) -> Self {
        Self {
            local,
            states: Mutex::new(Table::default()),
            local_clock: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            broadcasters: Mutex::new(Vec::new()),
            next_sub: AtomicU64::new(1),
        }
    }

    /// Local connection id
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.local
    }

    /// Current local clock
    #[must_use]
    pub fn local_clock(&self) -> u64 {
        self.local_clock.load(Ordering::SeqCst)
    }

    /// Local user, if set
    #[must_use]
    pub fn local_state(&self) -> Option<PresenceUser> {
        self.states
            .lock()
            .live
            .get(&self.local)
            .map(|e| e.user.clone())
    }

    /// Publish the local user; bumps the clock and broadcasts
    pub fn set_local_state(&self, user: PresenceUser) {
        let clock = self.local_clock.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.states.lock().live.insert(
            self.local,
            PresenceEntry {
                connection: self.local,
                clock,
                user: user.clone(),
            },
        );

        let mut change = AwarenessChange::default();
        match previous {
            None => change.added.push(self.local),
            Some(prev) if prev.user != user => change.updated.push(self.local),
            Some(_) => {}
        }

        self.broadcast(clock, Some(&user));
        if !change.is_empty() {
            self.emit(&change);
        }
    }

    /// Withdraw the local user; peers drop our entry
    pub fn clear_local_state(&self) {
        let clock = self.local_clock.fetch_add(1, Ordering::SeqCst) + 1;
        let removed = self.states.lock().live.remove(&self.local).is_some();
        self.broadcast(clock, None);
        if removed {
            self.emit(&AwarenessChange {
                removed: vec![self.local],
                ..AwarenessChange::default()
            });
        }
    }

    /// Every known entry, local included, ordered by connection id
    #[must_use]
    pub fn states(&self) -> Vec<PresenceEntry> {
        self.states.lock().live.values().cloned().collect()
    }

    /// Number of known entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.lock().live.len()
    }

    /// Whether no entry is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.lock().live.is_empty()
    }

    /// Apply state received from `conn`
    ///
    /// Stale clocks are ignored, including clocks at or below the last one
    /// seen before the connection's entry was removed. A `None` user removes
    /// the entry. Returns whether anything changed.
    pub fn apply_remote(&self, conn: ConnectionId, clock: u64, user: Option<PresenceUser>) -> bool {
        if conn == self.local {
            return false;
        }
        let change = {
            let mut states = self.states.lock();
            let last = states
                .live
                .get(&conn)
                .map(|e| e.clock)
                .or_else(|| states.departed.get(&conn).copied());
            if last.is_some_and(|last| clock <= last) {
                tracing::trace!(conn = %conn, clock, "stale awareness ignored");
                return false;
            }
            let mut change = AwarenessChange::default();
            match user {
                Some(user) => {
                    states.departed.remove(&conn);
                    let differs = states.live.get(&conn).map(|prev| prev.user != user);
                    states.live.insert(
                        conn,
                        PresenceEntry {
                            connection: conn,
                            clock,
                            user,
                        },
                    );
                    match differs {
                        None => change.added.push(conn),
                        Some(true) => change.updated.push(conn),
                        Some(false) => {}
                    }
                }
                None => {
                    if states.depart(conn) {
                        change.removed.push(conn);
                    }
                    let last = states.departed.entry(conn).or_default();
                    *last = (*last).max(clock);
                }
            }
            change
        };

        if change.is_empty() {
            return false;
        }
        self.emit(&change);
        true
    }

    /// Drop the entry of a departed connection
    pub fn remove(&self, conn: ConnectionId) -> bool {
        if conn == self.local {
            return false;
        }
        let removed = self.states.lock().depart(conn);
        if removed {
            self.emit(&AwarenessChange {
                removed: vec![conn],
                ..AwarenessChange::default()
            });
        }
        removed
    }

    /// Drop every remote entry (local connection went down)
    pub fn remove_all_remote(&self) {
        let removed: Vec<ConnectionId> = {
            let mut states = self.states.lock();
            let gone: Vec<ConnectionId> = states
                .live
                .keys()
                .copied()
                .filter(|c| *c != self.local)
                .collect();
            for conn in &gone {
                states.depart(*conn);
            }
            gone
        };
        if !removed.is_empty() {
            self.emit(&AwarenessChange {
                removed,
                ..AwarenessChange::default()
            });
        }
    }

    /// Forget the departure of `conn`, which joined again
    ///
    /// A rejoining connection re-announces its state with the clock it
    /// already had; without this the announcement would count as stale.
    pub fn rejoined(&self, conn: ConnectionId) {
        self.states.lock().departed.remove(&conn);
    }

    /// Register a change listener
    ///
    /// Listeners should re-derive whatever they show from [`Self::states`];
    /// the change summary is informational.
    pub fn on_change<F>(&self, callback: F) -> AwarenessSubscription
    where
        F: Fn(&Awareness, &AwarenessChange) + Send + Sync + 'static,
    {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));
        AwarenessSubscription(id)
    }

    /// Remove a change listener
    pub fn off(&self, sub: AwarenessSubscription) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != sub.0);
        listeners.len() != before
    }

    pub(crate) fn on_local_change(&self, callback: LocalCallback) -> u64 {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        self.broadcasters.lock().push((id, callback));
        id
    }

    pub(crate) fn off_local_change(&self, id: u64) {
        self.broadcasters.lock().retain(|(sub, _)| *sub != id);
    }

    fn broadcast(&self, clock: u64, user: Option<&PresenceUser>) {
        let callbacks: Vec<LocalCallback> = self
            .broadcasters
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(clock, user);
        }
    }

    fn emit(&self, change: &AwarenessChange) {
        let callbacks: Vec<ChangeCallback> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(self, change);
        }
    }
}
