//! Signaling: room-scoped discovery and message routing
//!
//! A [`Signaling`] implementation tells every member of a room when another
//! connection joins or leaves, and routes opaque payloads between members of
//! the same room. It never inspects payloads and never crosses rooms.

use crate::error::TransportError;
use crate::room::{ConnectionId, RoomToken};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Event delivered to a room member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Another connection is in the room (sent for existing members on join)
    PeerJoined {
        /// Joined connection
        conn: ConnectionId,
    },
    /// A connection left or dropped
    PeerLeft {
        /// Departed connection
        conn: ConnectionId,
    },
    /// Payload from another member
    Message {
        /// Sending connection
        from: ConnectionId,
        /// Opaque encoded frame
        payload: String,
    },
}

/// Addressee of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "to", content = "conn", rename_all = "snake_case")]
pub enum Recipient {
    /// Every other member of the room
    All,
    /// One member
    Peer(ConnectionId),
}

impl Recipient {
    fn includes(self, conn: ConnectionId) -> bool {
        match self {
            Self::All => true,
            Self::Peer(target) => target == conn,
        }
    }
}

/// Stream of events for one joined connection
pub type EventStream = mpsc::UnboundedReceiver<RelayEvent>;

/// Room-scoped discovery and routing
#[async_trait]
pub trait Signaling: Send + Sync + 'static {
    /// Join `room` as `conn`
    ///
    /// # Errors
    /// Returns an error when the relay cannot be reached
    async fn join(&self, room: &RoomToken, conn: ConnectionId)
        -> Result<EventStream, TransportError>;

    /// Route a payload to other members of `room`
    ///
    /// Best effort; a successful return does not mean anybody received it.
    ///
    /// # Errors
    /// Returns an error when `from` is not joined or the relay is gone
    fn send(
        &self,
        room: &RoomToken,
        from: ConnectionId,
        to: Recipient,
        payload: String,
    ) -> Result<(), TransportError>;

    /// Leave `room`; other members receive [`RelayEvent::PeerLeft`]
    fn leave(&self, room: &RoomToken, conn: ConnectionId);

    /// Whether `conn` is joined to `room` and the relay is reachable
    fn is_connected(&self, room: &RoomToken, conn: ConnectionId) -> bool;
}

#[derive(Debug)]
struct Member {
    conn: ConnectionId,
    tx: mpsc::UnboundedSender<RelayEvent>,
}

/// In-process relay shared by every peer of one process
///
/// Also serves as the routing table behind [`crate::TcpRelay`].
#[derive(Debug)]
pub struct LocalRelay {
    rooms: DashMap<RoomToken, Vec<Member>>,
    online: AtomicBool,
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRelay {
    /// Create an online relay with no rooms
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate the relay becoming unreachable (or reachable again)
    ///
    /// While offline, joins and sends fail; existing members stay registered.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        tracing::info!(online, "relay availability changed");
    }

    /// Whether the relay accepts traffic
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of connections in `room`
    #[must_use]
    pub fn room_size(&self, room: &RoomToken) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Number of non-empty rooms
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(TransportError::RelayUnavailable("relay offline".into()))
        }
    }
}

#[async_trait]
impl Signaling for LocalRelay {
    async fn join(
        &self,
        room: &RoomToken,
        conn: ConnectionId,
    ) -> Result<EventStream, TransportError> {
        self.ensure_online()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut members = self.rooms.entry(room.clone()).or_default();
        for member in members.iter() {
            let _ = member.tx.send(RelayEvent::PeerJoined { conn });
            let _ = tx.send(RelayEvent::PeerJoined { conn: member.conn });
        }
        members.retain(|m| m.conn != conn);
        members.push(Member { conn, tx });

        tracing::debug!(room = %room, conn = %conn, size = members.len(), "connection joined room");
        Ok(rx)
    }

    fn send(
        &self,
        room: &RoomToken,
        from: ConnectionId,
        to: Recipient,
        payload: String,
    ) -> Result<(), TransportError> {
        self.ensure_online()?;
        let not_joined = || TransportError::NotJoined {
            room: room.clone(),
            conn: from,
        };
        let members = self.rooms.get(room).ok_or_else(not_joined)?;
        if !members.iter().any(|m| m.conn == from) {
            return Err(not_joined());
        }

        for member in members.iter().filter(|m| m.conn != from && to.includes(m.conn)) {
            let event = RelayEvent::Message {
                from,
                payload: payload.clone(),
            };
            if member.tx.send(event).is_err() {
                tracing::trace!(room = %room, conn = %member.conn, "member stream closed");
            }
        }
        Ok(())
    }

    fn leave(&self, room: &RoomToken, conn: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            let before = members.len();
            members.retain(|m| m.conn != conn);
            if members.len() != before {
                for member in members.iter() {
                    let _ = member.tx.send(RelayEvent::PeerLeft { conn });
                }
                tracing::debug!(room = %room, conn = %conn, size = members.len(), "connection left room");
            }
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    fn is_connected(&self, room: &RoomToken, conn: ConnectionId) -> bool {
        self.is_online()
            && self
                .rooms
                .get(room)
                .is_some_and(|members| members.iter().any(|m| m.conn == conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn room(name: &str) -> RoomToken {
        RoomToken::new(name)
    }

    #[tokio::test]
    async fn join_announces_both_directions() {
        let relay = LocalRelay::new();
        let (a, b) = (ConnectionId(1), ConnectionId(2));
        let mut rx_a = relay.join(&room("r"), a).await.unwrap();
        let mut rx_b = relay.join(&room("r"), b).await.unwrap();

        assert_eq!(rx_a.recv().await, Some(RelayEvent::PeerJoined { conn: b }));
        assert_eq!(rx_b.recv().await, Some(RelayEvent::PeerJoined { conn: a }));
        assert_eq!(relay.room_size(&room("r")), 2);
    }

    #[tokio::test]
    async fn messages_stay_inside_their_room() {
        let relay = LocalRelay::new();
        let mut rx_a = relay.join(&room("one"), ConnectionId(1)).await.unwrap();
        let mut rx_b = relay.join(&room("two"), ConnectionId(2)).await.unwrap();

        relay
            .send(&room("one"), ConnectionId(1), Recipient::All, "hi".into())
            .unwrap();

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(relay.room_count(), 2);
    }

    #[tokio::test]
    async fn direct_message_reaches_only_addressee() {
        let relay = LocalRelay::new();
        let r = room("r");
        let _rx_a = relay.join(&r, ConnectionId(1)).await.unwrap();
        let mut rx_b = relay.join(&r, ConnectionId(2)).await.unwrap();
        let mut rx_c = relay.join(&r, ConnectionId(3)).await.unwrap();
        while rx_b.try_recv().is_ok() {}
        while rx_c.try_recv().is_ok() {}

        relay
            .send(&r, ConnectionId(1), Recipient::Peer(ConnectionId(3)), "x".into())
            .unwrap();

        assert!(rx_b.try_recv().is_err());
        assert_eq!(
            rx_c.try_recv().ok(),
            Some(RelayEvent::Message {
                from: ConnectionId(1),
                payload: "x".into()
            })
        );
    }

    #[tokio::test]
    async fn leave_notifies_and_drops_empty_rooms() {
        let relay = LocalRelay::new();
        let r = room("r");
        let mut rx_a = relay.join(&r, ConnectionId(1)).await.unwrap();
        let _rx_b = relay.join(&r, ConnectionId(2)).await.unwrap();
        let _ = rx_a.recv().await;

        relay.leave(&r, ConnectionId(2));
        assert_eq!(
            rx_a.recv().await,
            Some(RelayEvent::PeerLeft {
                conn: ConnectionId(2)
            })
        );
        relay.leave(&r, ConnectionId(1));
        assert_eq!(relay.room_count(), 0);
    }

    #[tokio::test]
    async fn offline_relay_refuses_joins_and_sends() {
        let relay = LocalRelay::new();
        let r = room("r");
        let _rx = relay.join(&r, ConnectionId(1)).await.unwrap();
        relay.set_online(false);

        assert!(matches!(
            relay.join(&r, ConnectionId(2)).await,
            Err(TransportError::RelayUnavailable(_))
        ));
        assert!(relay
            .send(&r, ConnectionId(1), Recipient::All, "x".into())
            .is_err());
        assert!(!relay.is_connected(&r, ConnectionId(1)));

        relay.set_online(true);
        assert!(relay.is_connected(&r, ConnectionId(1)));
        assert!(!relay.is_connected(&r, ConnectionId(2)));
    }

    #[tokio::test]
    async fn sending_without_joining_is_rejected() {
        let relay = LocalRelay::new();
        let err = relay
            .send(&room("r"), ConnectionId(9), Recipient::All, "x".into())
            .unwrap_err();
        assert!(matches!(err, TransportError::NotJoined { .. }));
    }
}
