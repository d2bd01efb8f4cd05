//! The replicated document
//!
//! One [`Doc`] per session holds the shared input text, the graph snapshot
//! map and the access-control map. Local changes run inside a
//! [`Transaction`]; on commit the batch is handed to update listeners (the
//! transport) and field observers fire. Remote updates go through
//! [`Doc::apply_update`], which buffers operations until their causal
//! dependencies are present, so a late full-state sync and a stream of
//! incremental updates converge to the same state.
//!
//! # Locking
//!
//! The state lock is held only while operations are generated or merged.
//! Listeners and observers run after it is released and receive `&Doc`, so
//! they may read or mutate the document re-entrantly. A transaction closure
//! must not call back into the same `Doc`; use the [`Transaction`] methods.

use crate::graph::CausalGraph;
use crate::id::{OpId, PeerId};
use crate::map::ReplicatedMap;
use crate::observer::{FieldEvent, ObserverRegistry, Origin, Subscription};
use crate::text::ReplicatedText;
use crate::update::{AccessStatus, Field, Op, OpKind, StateVector, Update};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Key of the single graph entry
pub const GRAPH_KEY: &str = "data";

struct DocState {
    peer: PeerId,
    lamport: u64,
    text: ReplicatedText,
    graph: ReplicatedMap<Option<Arc<CausalGraph>>>,
    access: ReplicatedMap<AccessStatus>,
    state_vector: StateVector,
    log: BTreeMap<PeerId, Vec<Op>>,
    pending: Vec<Op>,
}

impl DocState {
    fn new(peer: PeerId) -> Self {
        Self {
            peer,
            lamport: 0,
            text: ReplicatedText::new(),
            graph: ReplicatedMap::new(),
            access: ReplicatedMap::new(),
            state_vector: StateVector::new(),
            log: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    /// Generate and integrate a local operation
    fn local(&mut self, kind: OpKind) -> Op {
        let seq = self.state_vector.get(&self.peer) + 1;
        let op = Op {
            id: OpId::new(self.peer.clone(), seq),
            lamport: self.lamport + 1,
            kind,
        };
        self.integrate(op.clone());
        op
    }

    fn is_ready(&self, op: &Op) -> bool {
        if self.state_vector.get(&op.id.peer) + 1 != op.id.seq {
            return false;
        }
        match &op.kind {
            OpKind::Text { op } => self.text.is_ready(op),
            OpKind::GraphSet { .. } | OpKind::AccessSet { .. } => true,
        }
    }

    /// Apply a ready operation; returns whether its field visibly changed
    fn integrate(&mut self, op: Op) -> bool {
        self.lamport = self.lamport.max(op.lamport);
        let stamp = op.stamp();
        let changed = match &op.kind {
            OpKind::Text { op } => self.text.apply(op.clone()),
            OpKind::GraphSet { key, value } => self.graph.apply(key.clone(), value.clone(), stamp),
            OpKind::AccessSet { peer, status } => {
                self.access.apply(peer.as_str().to_owned(), *status, stamp)
            }
        };
        self.state_vector.advance(&op.id);
        self.log.entry(op.id.peer.clone()).or_default().push(op);
        changed
    }

    /// Merge remote operations, parking any whose dependencies are missing
    fn receive(&mut self, ops: Vec<Op>) -> BTreeSet<Field> {
        let mut touched = BTreeSet::new();
        for op in ops {
            if self.state_vector.covers(&op.id) {
                continue;
            }
            if self.is_ready(&op) {
                let field = op.kind.field();
                if self.integrate(op) {
                    touched.insert(field);
                }
            } else if !self.pending.iter().any(|p| p.id == op.id) {
                self.pending.push(op);
            }
        }
        self.drain_pending(&mut touched);
        touched
    }

    fn drain_pending(&mut self, touched: &mut BTreeSet<Field>) {
        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < self.pending.len() {
                if self.state_vector.covers(&self.pending[i].id) {
                    self.pending.swap_remove(i);
                } else if self.is_ready(&self.pending[i]) {
                    let op = self.pending.swap_remove(i);
                    let field = op.kind.field();
                    if self.integrate(op) {
                        touched.insert(field);
                    }
                    progressed = true;
                } else {
                    i += 1;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn diff(&self, remote: &StateVector) -> Update {
        let ops = self
            .log
            .iter()
            .flat_map(|(peer, ops)| {
                let have = usize::try_from(remote.get(peer)).unwrap_or(usize::MAX);
                ops.iter().skip(have).cloned()
            })
            .collect();
        Update { ops }
    }
}

/// Local batch of mutations
///
/// Obtained from [`Doc::transact`]. Every method generates operations that
/// are integrated immediately, so reads inside the same transaction observe
/// earlier writes.
pub struct Transaction<'a> {
    state: &'a mut DocState,
    ops: Vec<Op>,
    touched: BTreeSet<Field>,
}

impl<'a> Transaction<'a> {
    fn new(state: &'a mut DocState) -> Self {
        Self {
            state,
            ops: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    fn push(&mut self, kind: OpKind) -> OpId {
        self.touched.insert(kind.field());
        let op = self.state.local(kind);
        let id = op.id.clone();
        self.ops.push(op);
        id
    }

    /// Current text
    #[must_use]
    pub fn text(&self) -> String {
        self.state.text.to_string()
    }

    /// Insert `text` at visible character position `index`
    ///
    /// Positions past the end append.
    pub fn insert_text(&mut self, index: usize, text: &str) {
        let index = index.min(self.state.text.len());
        for (offset, ch) in text.chars().enumerate() {
            let op = self
                .state
                .text
                .insert_op(index + offset, ch, self.state.peer.clone());
            self.push(OpKind::Text { op });
        }
    }

    /// Delete `len` visible characters starting at `index`
    pub fn delete_text(&mut self, index: usize, len: usize) {
        for _ in 0..len {
            let Some(op) = self.state.text.delete_op(index, self.state.peer.clone()) else {
                break;
            };
            self.push(OpKind::Text { op });
        }
    }

    /// Make the text equal to `new_text`
    ///
    /// Only the span between the common prefix and common suffix is
    /// rewritten, so concurrent edits elsewhere in the text survive.
    pub fn replace_text(&mut self, new_text: &str) {
        let current: Vec<char> = self.state.text.to_string().chars().collect();
        let next: Vec<char> = new_text.chars().collect();

        let prefix = current
            .iter()
            .zip(&next)
            .take_while(|(a, b)| a == b)
            .count();
        let room = current.len().min(next.len()) - prefix;
        let suffix = current
            .iter()
            .rev()
            .zip(next.iter().rev())
            .take(room)
            .take_while(|(a, b)| a == b)
            .count();

        let removed = current.len() - prefix - suffix;
        if removed > 0 {
            self.delete_text(prefix, removed);
        }
        let inserted: String = next[prefix..next.len() - suffix].iter().collect();
        if !inserted.is_empty() {
            self.insert_text(prefix, &inserted);
        }
    }

    /// Replace the whole graph snapshot
    pub fn set_graph(&mut self, snapshot: Option<Arc<CausalGraph>>) {
        self.push(OpKind::GraphSet {
            key: GRAPH_KEY.to_owned(),
            value: snapshot,
        });
    }

    /// Upsert an access-control entry
    pub fn set_access(&mut self, peer: &PeerId, status: AccessStatus) {
        self.push(OpKind::AccessSet {
            peer: peer.clone(),
            status,
        });
    }

    fn finish(self) -> (Vec<Op>, BTreeSet<Field>) {
        (self.ops, self.touched)
    }
}

/// Replicated document handle
///
/// Cheap to clone; clones share state and observers.
#[derive(Clone)]
pub struct Doc {
    peer: PeerId,
    state: Arc<Mutex<DocState>>,
    observers: Arc<ObserverRegistry>,
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Doc")
            .field("peer", &self.peer)
            .field("lamport", &state.lamport)
            .field("text_len", &state.text.len())
            .field("pending", &state.pending.len())
            .finish_non_exhaustive()
    }
}

impl Doc {
    /// Create an empty document owned by `peer`
    #[must_use]
    pub fn new(peer: PeerId) -> Self {
        Self {
            state: Arc::new(Mutex::new(DocState::new(peer.clone()))),
            peer,
            observers: Arc::new(ObserverRegistry::default()),
        }
    }

    /// Local peer id
    #[inline]
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    /// Current shared input text
    #[must_use]
    pub fn text(&self) -> String {
        self.state.lock().text.to_string()
    }

    /// Current graph snapshot
    ///
    /// The snapshot is shared and immutable; to change the graph build a new
    /// [`CausalGraph`] and pass it to [`Doc::set_graph_snapshot`].
    #[must_use]
    pub fn graph(&self) -> Option<Arc<CausalGraph>> {
        self.state.lock().graph.get(GRAPH_KEY).cloned().flatten()
    }

    /// Access status of `peer`; `None` means not admitted
    #[must_use]
    pub fn access_status(&self, peer: &PeerId) -> Option<AccessStatus> {
        self.state.lock().access.get(peer.as_str()).copied()
    }

    /// Whether `peer` is admitted
    #[must_use]
    pub fn is_allowed(&self, peer: &PeerId) -> bool {
        self.access_status(peer) == Some(AccessStatus::Allowed)
    }

    /// Every admitted peer
    #[must_use]
    pub fn allowed_peers(&self) -> BTreeSet<PeerId> {
        self.state
            .lock()
            .access
            .iter()
            .filter(|(_, status)| **status == AccessStatus::Allowed)
            .map(|(peer, _)| PeerId::new(peer))
            .collect()
    }

    /// Sequence numbers applied so far, per peer
    #[must_use]
    pub fn state_vector(&self) -> StateVector {
        self.state.lock().state_vector.clone()
    }

    /// Every operation the holder of `remote` has not applied
    #[must_use]
    pub fn encode_diff(&self, remote: &StateVector) -> Update {
        self.state.lock().diff(remote)
    }

    /// Full state as an update
    #[must_use]
    pub fn encode_state(&self) -> Update {
        self.encode_diff(&StateVector::new())
    }

    /// Operations received but waiting for dependencies
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Run local mutations as one atomic batch
    pub fn transact<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        let (result, ops, touched) = {
            let mut state = self.state.lock();
            let mut txn = Transaction::new(&mut *state);
            let result = f(&mut txn);
            let (ops, touched) = txn.finish();
            (result, ops, touched)
        };

        if !ops.is_empty() {
            tracing::trace!(peer = %self.peer, ops = ops.len(), "committed local transaction");
            let update = Update { ops };
            for listener in self.observers.update_callbacks() {
                listener(&update);
            }
        }
        self.dispatch(&touched, Origin::Local);
        result
    }

    /// Make the shared text equal to `new_text`
    pub fn apply_local_text_edit(&self, new_text: &str) {
        self.transact(|txn| txn.replace_text(new_text));
    }

    /// Insert at a visible character position
    pub fn insert_text(&self, index: usize, text: &str) {
        self.transact(|txn| txn.insert_text(index, text));
    }

    /// Delete a visible character range
    pub fn delete_text(&self, index: usize, len: usize) {
        self.transact(|txn| txn.delete_text(index, len));
    }

    /// Append at the end of the text
    pub fn append_text(&self, text: &str) {
        self.transact(|txn| txn.insert_text(usize::MAX, text));
    }

    /// Replace the graph snapshot atomically
    ///
    /// Observers fire on every peer, this one included, even when the value
    /// equals the previous one.
    pub fn set_graph_snapshot(&self, snapshot: Option<CausalGraph>) {
        let snapshot = snapshot.map(Arc::new);
        self.transact(|txn| txn.set_graph(snapshot));
    }

    /// Upsert an access-control entry
    pub fn set_access_control(&self, peer: &PeerId, status: AccessStatus) {
        self.transact(|txn| txn.set_access(peer, status));
    }

    /// Merge a remote update (incremental or full state)
    ///
    /// Idempotent; duplicate and already-covered operations are ignored.
    pub fn apply_update(&self, update: Update) {
        if update.is_empty() {
            return;
        }
        let received = update.len();
        let (touched, pending) = {
            let mut state = self.state.lock();
            let touched = state.receive(update.ops);
            (touched, state.pending.len())
        };
        tracing::debug!(
            peer = %self.peer,
            received,
            pending,
            changed = touched.len(),
            "merged remote update"
        );
        self.dispatch(&touched, Origin::Remote);
    }

    /// Observe changes to one field
    pub fn observe<F>(&self, field: Field, callback: F) -> Subscription
    where
        F: Fn(&Doc, &FieldEvent) + Send + Sync + 'static,
    {
        self.observers.observe(field, Arc::new(callback))
    }

    /// Listen for locally generated updates
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.observers.on_update(Arc::new(callback))
    }

    /// Remove an observer or update listener
    pub fn unobserve(&self, sub: Subscription) -> bool {
        self.observers.remove(sub)
    }

    /// Registered (field observers, update listeners)
    #[must_use]
    pub fn observer_counts(&self) -> (usize, usize) {
        self.observers.counts()
    }

    fn dispatch(&self, touched: &BTreeSet<Field>, origin: Origin) {
        for field in touched {
            let event = FieldEvent {
                field: *field,
                origin,
            };
            for callback in self.observers.field_callbacks(*field) {
                callback(self, &event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, NodeKind};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(name: &str) -> Doc {
        Doc::new(PeerId::new(name))
    }

    fn sync(a: &Doc, b: &Doc) {
        b.apply_update(a.encode_diff(&b.state_vector()));
        a.apply_update(b.encode_diff(&a.state_vector()));
    }

    #[test]
    fn local_text_edit_uses_minimal_diff() {
        let d = doc("a");
        d.apply_local_text_edit("hello world");
        let before = d.state_vector().get(d.peer_id());
        d.apply_local_text_edit("hello brave world");
        let after = d.state_vector().get(d.peer_id());
        assert_eq!(d.text(), "hello brave world");
        assert_eq!(after - before, "brave ".len() as u64);
    }

    #[test]
    fn identical_edit_produces_no_update() {
        let d = doc("a");
        d.apply_local_text_edit("same");
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        d.on_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        d.apply_local_text_edit("same");
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_edits_keep_both_insertions() {
        let a = doc("a");
        let b = doc("b");
        a.apply_local_text_edit("base");
        sync(&a, &b);

        a.insert_text(4, " one");
        b.insert_text(4, " two");
        sync(&a, &b);

        assert_eq!(a.text(), b.text());
        let mut chars: Vec<char> = a.text().chars().collect();
        chars.sort_unstable();
        let mut expected: Vec<char> = "base one two".chars().collect();
        expected.sort_unstable();
        assert_eq!(chars, expected);
    }

    #[test]
    fn remote_delete_waits_for_the_insert_it_targets() {
        let a = doc("a");
        let b = doc("b");
        a.apply_local_text_edit("abc");
        sync(&a, &b);
        let c = doc("c");

        // b deletes a's character; c hears of the delete before the insert
        b.delete_text(1, 1);
        c.apply_update(b.encode_diff(&a.state_vector()));
        assert_eq!(c.pending_len(), 1);

        c.apply_update(a.encode_state());
        assert_eq!(c.text(), "ac");
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn out_of_order_ops_wait_for_dependencies() {
        let a = doc("a");
        a.apply_local_text_edit("ab");
        let mut ops = a.encode_state().ops;
        ops.reverse();

        let b = doc("b");
        b.apply_update(Update {
            ops: vec![ops[0].clone()],
        });
        assert_eq!(b.text(), "");
        assert_eq!(b.pending_len(), 1);

        b.apply_update(Update { ops });
        assert_eq!(b.text(), "ab");
        assert_eq!(b.pending_len(), 0);
    }

    #[test]
    fn full_state_and_incremental_are_interchangeable() {
        let a = doc("a");
        let incremental = doc("inc");
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        a.on_update(move |u| sink.lock().push(u.clone()));

        a.apply_local_text_edit("graph notes");
        a.set_graph_snapshot(Some(
            CausalGraph::new().with_node(GraphNode::new("n", "N", NodeKind::Driver)),
        ));
        a.apply_local_text_edit("graph");

        for update in updates.lock().drain(..) {
            incremental.apply_update(update);
        }
        let late = doc("late");
        late.apply_update(a.encode_state());

        assert_eq!(incremental.text(), a.text());
        assert_eq!(late.text(), a.text());
        assert_eq!(late.graph(), a.graph());
        assert_eq!(incremental.graph(), a.graph());
    }

    #[test]
    fn graph_last_writer_wins_on_every_peer() {
        let a = doc("a");
        let b = doc("b");
        a.set_graph_snapshot(Some(
            CausalGraph::new().with_node(GraphNode::new("x", "from a", NodeKind::Driver)),
        ));
        b.set_graph_snapshot(Some(
            CausalGraph::new().with_node(GraphNode::new("y", "from b", NodeKind::Outcome)),
        ));
        sync(&a, &b);

        let winner = a.graph().unwrap();
        assert_eq!(b.graph().unwrap(), winner);
        // equal lamport, so the greater peer id wins
        assert_eq!(winner.nodes[0].id, "y");
    }

    #[test]
    fn graph_observer_fires_locally_and_remotely() {
        let a = doc("a");
        let b = doc("b");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for d in [&a, &b] {
            let seen = Arc::clone(&seen);
            d.observe(Field::SharedGraph, move |doc, ev| {
                seen.lock().push((doc.peer_id().to_string(), ev.origin));
            });
        }
        a.set_graph_snapshot(None);
        sync(&a, &b);
        assert_eq!(
            *seen.lock(),
            vec![
                ("a".to_string(), Origin::Local),
                ("b".to_string(), Origin::Remote)
            ]
        );
    }

    #[test]
    fn observers_may_mutate_reentrantly() {
        let d = doc("a");
        d.observe(Field::AccessControl, |doc, _| {
            if doc.graph().is_none() {
                doc.set_graph_snapshot(Some(CausalGraph::new()));
            }
        });
        d.set_access_control(&PeerId::new("a"), AccessStatus::Allowed);
        assert!(d.graph().is_some());
        assert!(d.is_allowed(&PeerId::new("a")));
    }

    #[test]
    fn access_upsert_is_idempotent_across_peers() {
        let a = doc("a");
        let b = doc("b");
        let joiner = PeerId::new("c");
        a.set_access_control(&joiner, AccessStatus::Allowed);
        b.set_access_control(&joiner, AccessStatus::Allowed);
        sync(&a, &b);
        assert!(a.is_allowed(&joiner));
        assert_eq!(a.allowed_peers(), b.allowed_peers());
        assert_eq!(a.allowed_peers().len(), 1);
    }

    #[test]
    fn unobserve_stops_notifications() {
        let d = doc("a");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = d.observe(Field::SharedInput, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        d.append_text("x");
        assert!(d.unobserve(sub));
        d.append_text("y");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(d.observer_counts(), (0, 0));
    }

    #[test]
    fn reapplying_own_state_is_a_no_op() {
        let d = doc("a");
        d.apply_local_text_edit("hello");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        d.observe(Field::SharedInput, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        d.apply_update(d.encode_state());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(d.text(), "hello");
    }
}
