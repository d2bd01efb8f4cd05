//! Scaffold Session
//!
//! Everything one peer does inside a collaborative scaffolding room:
//!
//! 1. **Bootstrap**: read the room token from the location fragment, or mint
//!    one and become the room's creator.
//! 2. **Admission**: joiners wait gated until an admitted peer marks them
//!    allowed in the shared access table.
//! 3. **Workspace**: admitted peers edit the shared input, publish causal
//!    graphs, and keep their own evidence, simulations and reports.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use scaffold_session::prelude::*;
//!
//! let relay = Arc::new(LocalRelay::new());
//! let creator = Session::start(SessionConfig::default(), relay.clone(),
//!     SessionLocation::new("https://scaffold.local/")).await?;
//! let joiner = Session::start(SessionConfig::default(), relay,
//!     SessionLocation::new(creator.invite_link())).await?;
//!
//! creator.admit(joiner.peer_id())?;
//! creator.type_input("Rainfall increases soil moisture.")?;
//! creator.extract_graph().await?;
//! ```

#![warn(unreachable_pub)]

pub mod admission;
pub mod analysis;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod presence;
pub mod projection;
pub mod session;
pub mod sim;

pub use admission::{AdmissionGate, Stage};
pub use bootstrap::{Bootstrap, Role, SessionLocation};
pub use config::SessionConfig;
pub use error::{AnalysisError, SessionError};
pub use projection::{Projection, View};
pub use session::Session;

/// Common imports
pub mod prelude {
    pub use crate::analysis::{Analyst, FallbackAnalyst, HeuristicAnalyst, LocalArtifacts};
    pub use crate::presence::{PendingRequest, RosterEntry};
    pub use crate::{
        AnalysisError, Role, Session, SessionConfig, SessionError, SessionLocation, Stage, View,
    };
    pub use scaffold_crdt::{CausalGraph, Doc, PeerId};
    pub use scaffold_net::{LocalRelay, RoomToken, Signaling, TcpRelay, TcpSignaling};
    pub use std::sync::Arc;
}
