//! Admission control
//!
//! A peer is `Gated` until the replicated access table maps its id to
//! `Allowed`, then `Active` for the rest of the session. There is no way
//! back: admission is never revoked.
//!
//! Enforcement is soft. The document accepts writes from anyone; gating is
//! a convention the session layer applies to its own peer.

use crate::error::SessionError;
use parking_lot::Mutex;
use scaffold_crdt::{AccessStatus, Doc, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Visible stage of the local peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Connected, waiting for an admitted peer to let us in
    #[default]
    Gated,
    /// Admitted; full read/write
    Active,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gated => "gated",
            Self::Active => "active",
        })
    }
}

/// Stages reachable from `from`
#[must_use]
pub fn allowed_transitions(from: Stage) -> Vec<Stage> {
    match from {
        Stage::Gated => vec![Stage::Active],
        Stage::Active => vec![],
    }
}

/// Validate a stage transition
///
/// # Errors
/// Returns [`SessionError::IllegalTransition`] for anything but `Gated -> Active`
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), SessionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SessionError::IllegalTransition { from, to })
    }
}

/// Admission state machine for the local peer
pub struct AdmissionGate {
    peer: PeerId,
    stage: Mutex<Stage>,
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("peer", &self.peer)
            .field("stage", &*self.stage.lock())
            .finish_non_exhaustive()
    }
}

impl AdmissionGate {
    /// Gate for `peer` starting at `initial`
    #[must_use]
    pub fn new(peer: PeerId, initial: Stage) -> Self {
        Self {
            peer,
            stage: Mutex::new(initial),
        }
    }

    /// Current stage
    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.lock()
    }

    /// Whether the local peer is admitted
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.stage() == Stage::Active
    }

    /// Re-read the access table and advance if we have been admitted
    ///
    /// Returns the transition taken, if any. Safe to call from any document
    /// observer, any number of times.
    pub fn refresh(&self, doc: &Doc) -> Option<(Stage, Stage)> {
        if !doc.is_allowed(&self.peer) {
            return None;
        }
        let from = {
            let mut stage = self.stage.lock();
            let from = *stage;
            if validate_transition(from, Stage::Active).is_err() {
                return None;
            }
            *stage = Stage::Active;
            from
        };

        tracing::info!(peer = %self.peer, "admitted to room");
        Some((from, Stage::Active))
    }

    /// Admit `candidate` by writing `Allowed` to the shared access table
    ///
    /// Concurrent admissions of the same peer by different admitted peers
    /// converge to the same entry. Returns `false` if the candidate was
    /// already admitted.
    ///
    /// # Errors
    /// Returns [`SessionError::NotAdmitted`] while the local peer is gated
    pub fn admit(&self, doc: &Doc, candidate: &PeerId) -> Result<bool, SessionError> {
        let stage = self.stage();
        if stage != Stage::Active {
            return Err(SessionError::NotAdmitted { stage });
        }
        if doc.is_allowed(candidate) {
            return Ok(false);
        }
        tracing::info!(peer = %self.peer, candidate = %candidate, "admitting peer");
        doc.set_access_control(candidate, AccessStatus::Allowed);
        Ok(true)
    }
}
