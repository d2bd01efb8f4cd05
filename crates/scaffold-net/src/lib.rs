//! Scaffold Networking
//!
//! Room-token discovery, signaling relays, and the provider that keeps a
//! [`scaffold_crdt::Doc`] in sync with every other peer in the same room.
//!
//! # Architecture
//!
//! ```text
//! Doc ──on_update──► Provider ──Frame──► Signaling (LocalRelay | TcpSignaling)
//!  ▲                    │                        │
//!  └───apply_update─────┴◄──────RelayEvent───────┘
//! ```
//!
//! Relays are routers only: they know rooms and connections, never documents.
//! Any relay failure degrades the provider to lone-peer operation.

#![warn(unreachable_pub)]

mod awareness;
mod error;
mod provider;
mod room;
mod signaling;
mod tcp;
mod wire;

pub use awareness::{Awareness, AwarenessChange, AwarenessSubscription, PresenceEntry, PresenceUser};
pub use error::TransportError;
pub use provider::{connect, ConnectionHandle, RESYNC_INTERVAL};
pub use room::{ConnectionId, RoomToken};
pub use signaling::{EventStream, LocalRelay, Recipient, RelayEvent, Signaling};
pub use tcp::{TcpRelay, TcpSignaling};
pub use wire::Frame;
