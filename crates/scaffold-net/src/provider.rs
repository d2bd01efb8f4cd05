//! Binds a document to a room on a signaling relay
//!
//! The provider runs the two-step sync handshake with every peer it meets,
//! forwards local document updates, and carries awareness. Failures never
//! escape: an unreachable relay yields an offline handle and the document
//! keeps working for a lone user.
//!
//! Lost updates are repaired by resending the state vector. That happens
//! when an incoming update leaves a gap, when a peer's state vector shows
//! ops we lack, and on every [`RESYNC_INTERVAL`] tick.

use crate::awareness::{Awareness, PresenceUser};
use crate::room::{ConnectionId, RoomToken};
use crate::signaling::{EventStream, Recipient, RelayEvent, Signaling};
use crate::wire::Frame;
use scaffold_crdt::{Doc, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Period of the anti-entropy state-vector broadcast
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Sending side of a joined connection
#[derive(Clone)]
struct Link {
    signaling: Arc<dyn Signaling>,
    room: RoomToken,
    connection: ConnectionId,
    undelivered: Arc<AtomicBool>,
}

impl Link {
    fn request_sync(&self, to: Recipient, doc: &Doc) {
        self.send(
            to,
            &Frame::SyncStep1 {
                state_vector: doc.state_vector(),
            },
        );
    }

    fn send(&self, to: Recipient, frame: &Frame) {
        let payload = match frame.encode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(kind = frame.kind(), error = %err, "failed to encode frame");
                return;
            }
        };
        if let Err(err) = self
            .signaling
            .send(&self.room, self.connection, to, payload)
        {
            self.undelivered.store(true, Ordering::SeqCst);
            tracing::debug!(
                room = %self.room,
                conn = %self.connection,
                kind = frame.kind(),
                error = %err,
                "frame not delivered"
            );
        }
    }
}

/// Join `room` and start syncing `doc` with whoever else is there
///
/// Never fails. If the relay is unreachable the returned handle is offline
/// and carries a local-only awareness.
pub async fn connect(signaling: Arc<dyn Signaling>, room: RoomToken, doc: Doc) -> ConnectionHandle {
    let connection = ConnectionId::random();
    let awareness = Arc::new(Awareness::new(connection));

    let events = match signaling.join(&room, connection).await {
        Ok(events) => events,
        Err(err) => {
            tracing::warn!(
                room = %room,
                peer = %doc.peer_id(),
                error = %err,
                "relay unreachable, continuing without peers"
            );
            return ConnectionHandle {
                room,
                connection,
                doc,
                awareness,
                live: None,
            };
        }
    };
    tracing::info!(room = %room, conn = %connection, peer = %doc.peer_id(), "joined room");

    let link = Link {
        signaling,
        room: room.clone(),
        connection,
        undelivered: Arc::new(AtomicBool::new(false)),
    };

    let doc_sub = {
        let link = link.clone();
        doc.on_update(move |update| {
            link.send(
                Recipient::All,
                &Frame::Update {
                    update: update.clone(),
                },
            );
        })
    };
    let awareness_sub = {
        let link = link.clone();
        awareness.on_local_change(Arc::new(move |clock, user: Option<&PresenceUser>| {
            link.send(
                Recipient::All,
                &Frame::Awareness {
                    clock,
                    user: user.cloned(),
                },
            );
        }))
    };
    let pump = tokio::spawn(pump(link.clone(), doc.clone(), Arc::clone(&awareness), events));

    ConnectionHandle {
        room,
        connection,
        doc,
        awareness,
        live: Some(Live {
            link,
            pump,
            doc_sub,
            awareness_sub,
        }),
    }
}

async fn pump(link: Link, doc: Doc, awareness: Arc<Awareness>, mut events: EventStream) {
    let mut resync = tokio::time::interval_at(
        tokio::time::Instant::now() + RESYNC_INTERVAL,
        RESYNC_INTERVAL,
    );
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = resync.tick() => {
                let undelivered = link.undelivered.swap(false, Ordering::SeqCst);
                if undelivered || doc.pending_len() > 0 {
                    tracing::debug!(room = %link.room, undelivered, pending = doc.pending_len(), "resyncing");
                }
                link.request_sync(Recipient::All, &doc);
                continue;
            }
        };
        match event {
            RelayEvent::PeerJoined { conn } => {
                tracing::debug!(room = %link.room, conn = %conn, "peer appeared");
                awareness.rejoined(conn);
                link.request_sync(Recipient::Peer(conn), &doc);
                if let Some(user) = awareness.local_state() {
                    link.send(
                        Recipient::Peer(conn),
                        &Frame::Awareness {
                            clock: awareness.local_clock(),
                            user: Some(user),
                        },
                    );
                }
            }
            RelayEvent::PeerLeft { conn } => {
                tracing::debug!(room = %link.room, conn = %conn, "peer left");
                awareness.remove(conn);
            }
            RelayEvent::Message { from, payload } => match Frame::decode(&payload) {
                Ok(frame) => handle_frame(&link, &doc, &awareness, from, frame),
                Err(err) => {
                    tracing::warn!(room = %link.room, from = %from, error = %err, "dropping malformed frame");
                }
            },
        }
    }
    tracing::debug!(room = %link.room, conn = %link.connection, "relay stream ended");
}

fn handle_frame(link: &Link, doc: &Doc, awareness: &Awareness, from: ConnectionId, frame: Frame) {
    tracing::trace!(room = %link.room, from = %from, kind = frame.kind(), "frame received");
    match frame {
        Frame::SyncStep1 { state_vector } => {
            let update = doc.encode_diff(&state_vector);
            if !update.is_empty() {
                link.send(Recipient::Peer(from), &Frame::SyncStep2 { update });
            }
            if !doc.state_vector().includes(&state_vector) {
                link.request_sync(Recipient::Peer(from), doc);
            }
        }
        Frame::SyncStep2 { update } => doc.apply_update(update),
        Frame::Update { update } => {
            let gap_before = doc.pending_len();
            doc.apply_update(update);
            if doc.pending_len() > gap_before {
                tracing::debug!(room = %link.room, from = %from, "update arrived ahead of its dependencies");
                link.request_sync(Recipient::Peer(from), doc);
            }
        }
        Frame::Awareness { clock, user } => {
            awareness.apply_remote(from, clock, user);
        }
    }
}

struct Live {
    link: Link,
    pump: JoinHandle<()>,
    doc_sub: Subscription,
    awareness_sub: u64,
}

/// A document's membership in one room
///
/// Dropping the handle disconnects it.
pub struct ConnectionHandle {
    room: RoomToken,
    connection: ConnectionId,
    doc: Doc,
    awareness: Arc<Awareness>,
    live: Option<Live>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("room", &self.room)
            .field("connection", &self.connection)
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Room this handle belongs to
    #[inline]
    #[must_use]
    pub fn room(&self) -> &RoomToken {
        &self.room
    }

    /// Transport-assigned connection id
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Awareness for this connection
    #[inline]
    #[must_use]
    pub fn awareness(&self) -> &Arc<Awareness> {
        &self.awareness
    }

    /// The synced document
    #[inline]
    #[must_use]
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Whether the relay accepted the join and the link to it is up
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.link.signaling.is_connected(&self.room, self.connection))
    }

    /// Leave the room and stop syncing; idempotent
    ///
    /// Writes already made stay in the document and on every peer that
    /// received them.
    pub fn disconnect(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        self.awareness.clear_local_state();
        live.link.signaling.leave(&self.room, self.connection);
        live.pump.abort();
        self.doc.unobserve(live.doc_sub);
        self.awareness.off_local_change(live.awareness_sub);
        self.awareness.remove_all_remote();
        tracing::info!(room = %self.room, conn = %self.connection, "left room");
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}
