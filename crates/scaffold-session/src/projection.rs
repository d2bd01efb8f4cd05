//! Local view state mirrored from the replicated document
//!
//! The projection is what a UI would render. It is never replicated. Each
//! real change bumps `revision`; re-applying a value the projection already
//! holds is a no-op, which is what stops a peer from reacting to the echo
//! of its own writes.

use crate::admission::Stage;
use crate::presence::{PendingRequest, RosterEntry};
use scaffold_crdt::{CausalGraph, PeerId};
use std::sync::Arc;

/// What the local peer sees
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    /// Gated: a waiting screen, no shared state
    Waiting {
        /// Connected clients, self included
        online: usize,
    },
    /// Admitted: the shared workspace
    Workspace {
        /// Shared input text
        text: String,
        /// Shared graph
        graph: Option<Arc<CausalGraph>>,
        /// Requests awaiting admission
        pending: Vec<PendingRequest>,
    },
}

/// Local mirror of the document plus presence-derived state
#[derive(Debug, Clone, Default)]
pub struct Projection {
    text: String,
    graph: Option<Arc<CausalGraph>>,
    stage: Stage,
    roster: Vec<RosterEntry>,
    pending: Vec<PendingRequest>,
    revision: u64,
}

impl Projection {
    /// Empty projection at `stage`
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    /// Mirrored text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Mirrored graph
    #[must_use]
    pub fn graph(&self) -> Option<&Arc<CausalGraph>> {
        self.graph.as_ref()
    }

    /// Stage last seen
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Roster last derived
    #[must_use]
    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    /// Pending requests last derived (minus local dismissals)
    #[must_use]
    pub fn pending(&self) -> &[PendingRequest] {
        &self.pending
    }

    /// Number of real changes applied so far
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump(&mut self) -> bool {
        self.revision += 1;
        true
    }

    /// Mirror document text; equal text is an echo and changes nothing
    pub fn apply_text(&mut self, incoming: &str) -> bool {
        if self.text == incoming {
            return false;
        }
        self.text = incoming.to_owned();
        self.bump()
    }

    /// Mirror the graph snapshot; the same snapshot again changes nothing
    pub fn apply_graph(&mut self, incoming: Option<Arc<CausalGraph>>) -> bool {
        let same = match (&self.graph, &incoming) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        };
        if same {
            return false;
        }
        self.graph = incoming;
        self.bump()
    }

    /// Record a stage change
    pub fn set_stage(&mut self, stage: Stage) -> bool {
        if self.stage == stage {
            return false;
        }
        self.stage = stage;
        self.bump()
    }

    /// Replace the roster
    pub fn set_roster(&mut self, roster: Vec<RosterEntry>) -> bool {
        if self.roster == roster {
            return false;
        }
        self.roster = roster;
        self.bump()
    }

    /// Replace the pending list
    pub fn set_pending(&mut self, pending: Vec<PendingRequest>) -> bool {
        if self.pending == pending {
            return false;
        }
        self.pending = pending;
        self.bump()
    }

    /// Hide a request until the next recomputation
    pub fn dismiss(&mut self, peer: &PeerId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| &p.peer_id != peer);
        if self.pending.len() == before {
            return false;
        }
        self.bump()
    }

    /// What to render now
    #[must_use]
    pub fn view(&self) -> View {
        match self.stage {
            Stage::Gated => View::Waiting {
                online: self.roster.len(),
            },
            Stage::Active => View::Workspace {
                text: self.text.clone(),
                graph: self.graph.clone(),
                pending: self.pending.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scaffold_crdt::{GraphNode, NodeKind};

    #[test]
    fn echoed_text_is_ignored() {
        let mut p = Projection::new(Stage::Active);
        assert!(p.apply_text("hello"));
        assert!(!p.apply_text("hello"));
        assert_eq!(p.revision(), 1);
    }

    #[test]
    fn same_graph_is_idempotent() {
        let graph = Arc::new(CausalGraph::new().with_node(GraphNode::new("a", "A", NodeKind::Driver)));
        let mut p = Projection::new(Stage::Active);
        assert!(p.apply_graph(Some(Arc::clone(&graph))));
        assert!(!p.apply_graph(Some(Arc::clone(&graph))));
        assert!(!p.apply_graph(Some(Arc::new((*graph).clone()))));
        assert!(p.apply_graph(None));
        assert_eq!(p.revision(), 2);
    }

    #[test]
    fn gated_projection_shows_waiting() {
        let mut p = Projection::new(Stage::Gated);
        p.apply_text("secret");
        assert_eq!(p.view(), View::Waiting { online: 0 });

        p.set_stage(Stage::Active);
        assert!(matches!(p.view(), View::Workspace { ref text, .. } if text == "secret"));
    }

    #[test]
    fn dismiss_hides_until_recomputed() {
        let request = PendingRequest {
            peer_id: PeerId::new("guest"),
            name: "Guest".into(),
        };
        let mut p = Projection::new(Stage::Active);
        p.set_pending(vec![request.clone()]);
        assert!(p.dismiss(&PeerId::new("guest")));
        assert!(p.pending().is_empty());
        assert!(!p.dismiss(&PeerId::new("guest")));

        assert!(p.set_pending(vec![request]));
        assert_eq!(p.pending().len(), 1);
    }
}
