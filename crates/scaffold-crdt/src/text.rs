//! Shared input text on top of [`crdts::List`]
//!
//! Each character sits at a dense [`Identifier`] carrying the dot of the
//! insert that created it. `List` needs a delete to arrive after its insert,
//! so [`ReplicatedText::is_ready`] holds deletes back until the insert's dot
//! has been applied here.

use crate::id::PeerId;
use crdts::list::{List, Op};
use crdts::{CmRDT, Identifier, OrdDot, VClock};
use std::fmt;

/// One character insert or delete
pub type TextOp = Op<char, PeerId>;

/// Sequence CRDT holding the shared text
#[derive(Debug, Clone, Default)]
pub struct ReplicatedText {
    list: List<char, PeerId>,
    applied: VClock<PeerId>,
}

impl ReplicatedText {
    /// Empty text
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of visible characters
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether no visible characters remain
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Whether the insert that produced `id` has been applied
    #[must_use]
    pub fn has_seen(&self, id: &Identifier<OrdDot<PeerId>>) -> bool {
        let dot = id.value();
        self.applied.get(&dot.actor) >= dot.counter
    }

    /// Op inserting `ch` at visible position `index`; past the end appends
    #[must_use]
    pub fn insert_op(&self, index: usize, ch: char, actor: PeerId) -> TextOp {
        self.list.insert_index(index, ch, actor)
    }

    /// Op deleting the character at `index`, if there is one
    #[must_use]
    pub fn delete_op(&self, index: usize, actor: PeerId) -> Option<TextOp> {
        self.list.delete_index(index, actor)
    }

    /// Whether `op` can be applied without losing its effect
    #[must_use]
    pub fn is_ready(&self, op: &TextOp) -> bool {
        match op {
            Op::Insert { .. } => true,
            Op::Delete { id, .. } => self.has_seen(id),
        }
    }

    /// Apply an op; returns `true` when the visible text changed
    pub(crate) fn apply(&mut self, op: TextOp) -> bool {
        let before = self.list.len();
        self.applied.apply(op.dot());
        self.list.apply(op);
        self.list.len() != before
    }
}

impl fmt::Display for ReplicatedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.list.iter().try_for_each(|ch| write!(f, "{ch}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    fn type_into(text: &mut ReplicatedText, at: usize, s: &str, actor: &str) -> Vec<TextOp> {
        s.chars()
            .enumerate()
            .map(|(i, ch)| {
                let op = text.insert_op(at + i, ch, peer(actor));
                text.apply(op.clone());
                op
            })
            .collect()
    }

    #[test]
    fn sequential_inserts_read_in_order() {
        let mut text = ReplicatedText::new();
        type_into(&mut text, 0, "hi", "a");
        assert_eq!(text.to_string(), "hi");
        assert_eq!(text.len(), 2);
    }

    #[test]
    fn concurrent_inserts_at_same_position_resolve_identically() {
        let mut base = ReplicatedText::new();
        let seed = type_into(&mut base, 0, "x", "a");

        let mut a = base.clone();
        let mut b = base.clone();
        let from_a = type_into(&mut a, 1, "A", "a");
        let from_b = type_into(&mut b, 1, "B", "b");

        for op in from_b {
            a.apply(op);
        }
        for op in from_a {
            b.apply(op);
        }
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.len(), 3);
        assert!(seed.iter().all(|op| a.has_seen(op.id())));
    }

    #[test]
    fn delete_waits_for_its_insert() {
        let mut origin = ReplicatedText::new();
        let inserts = type_into(&mut origin, 0, "ab", "a");
        let delete = origin.delete_op(0, peer("a")).unwrap();

        let mut remote = ReplicatedText::new();
        assert!(!remote.is_ready(&delete));
        for op in inserts {
            remote.apply(op);
        }
        assert!(remote.is_ready(&delete));
        assert!(remote.apply(delete));
        assert_eq!(remote.to_string(), "b");
    }

    #[test]
    fn duplicate_ops_are_ignored() {
        let mut text = ReplicatedText::new();
        let ops = type_into(&mut text, 0, "q", "a");
        assert!(!text.apply(ops[0].clone()));
        assert_eq!(text.to_string(), "q");
    }

    #[test]
    fn delete_past_the_end_yields_nothing() {
        let mut text = ReplicatedText::new();
        type_into(&mut text, 0, "z", "a");
        assert!(text.delete_op(1, peer("a")).is_none());
    }
}
