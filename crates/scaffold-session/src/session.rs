//! One peer's participation in a room
//!
//! A session owns the document, its connection, the admission gate and the
//! local projection. Document observers and awareness listeners keep the
//! projection current; they hold weak references so dropping the session
//! tears everything down.

use crate::admission::{AdmissionGate, Stage};
use crate::analysis::{
    Analyst, Check, Evidence, FallbackAnalyst, HeuristicAnalyst, LocalArtifacts, Report, ReportInput,
    SimulationResult,
};
use crate::bootstrap::{self, Bootstrap, Role, SessionLocation};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::presence::{build_roster, color_for, default_name, pending_requests, PendingRequest, RosterEntry};
use crate::projection::{Projection, View};
use parking_lot::Mutex;
use scaffold_crdt::{AccessStatus, CausalGraph, Doc, Field, PeerId, Subscription};
use scaffold_net::{
    connect, Awareness, AwarenessSubscription, ConnectionHandle, ConnectionId, PresenceUser,
    RoomToken, Signaling,
};
use std::sync::{Arc, Weak};

/// State shared with document observers and awareness listeners
struct Shared {
    doc: Doc,
    gate: AdmissionGate,
    projection: Mutex<Projection>,
    connection: ConnectionId,
}

impl Shared {
    fn sync_text(&self) {
        let text = self.doc.text();
        if self.projection.lock().apply_text(&text) {
            tracing::trace!(peer = %self.doc.peer_id(), len = text.len(), "projected text");
        }
    }

    fn sync_graph(&self) {
        let graph = self.doc.graph();
        self.projection.lock().apply_graph(graph);
    }

    fn sync_admission(&self) {
        if let Some((_, to)) = self.gate.refresh(&self.doc) {
            self.projection.lock().set_stage(to);
        }
    }

    fn sync_presence(&self, awareness: &Awareness) {
        let entries = awareness.states();
        let allowed = self.doc.allowed_peers();
        let roster = build_roster(&entries, &allowed, self.connection);
        let pending = if self.gate.is_active() {
            pending_requests(&entries, &allowed, self.doc.peer_id())
        } else {
            Vec::new()
        };
        let mut projection = self.projection.lock();
        projection.set_roster(roster);
        projection.set_pending(pending);
    }
}

fn with_shared(weak: &Weak<Shared>, f: impl FnOnce(&Shared)) {
    if let Some(shared) = weak.upgrade() {
        f(&shared);
    }
}

/// A peer in a room
pub struct Session {
    shared: Arc<Shared>,
    handle: ConnectionHandle,
    location: SessionLocation,
    bootstrap: Bootstrap,
    analyst: Arc<dyn Analyst>,
    artifacts: Mutex<LocalArtifacts>,
    doc_subs: Vec<Subscription>,
    presence_sub: Option<AwarenessSubscription>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", self.peer_id())
            .field("room", self.room())
            .field("role", &self.bootstrap.role)
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Bootstrap from `location`, connect, and publish presence
    ///
    /// Uses the offline [`HeuristicAnalyst`].
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] for an invalid configuration. An
    /// unreachable relay is not an error: the session runs alone.
    pub async fn start(
        config: SessionConfig,
        signaling: Arc<dyn Signaling>,
        location: SessionLocation,
    ) -> Result<Self, SessionError> {
        let analyst = Arc::new(HeuristicAnalyst::new().with_steps(config.simulation_steps));
        Self::launch(config, signaling, location, analyst).await
    }

    /// [`Session::start`] with a specific analysis collaborator
    ///
    /// Unless [`SessionConfig::heuristic_fallback`] is off, a failing
    /// `analyst` is answered for by the heuristic one.
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] for an invalid configuration
    pub async fn start_with_analyst(
        config: SessionConfig,
        signaling: Arc<dyn Signaling>,
        location: SessionLocation,
        analyst: Arc<dyn Analyst>,
    ) -> Result<Self, SessionError> {
        let analyst: Arc<dyn Analyst> = if config.heuristic_fallback {
            let fallback = HeuristicAnalyst::new().with_steps(config.simulation_steps);
            Arc::new(FallbackAnalyst::new(analyst).with_fallback(fallback))
        } else {
            analyst
        };
        Self::launch(config, signaling, location, analyst).await
    }

    async fn launch(
        config: SessionConfig,
        signaling: Arc<dyn Signaling>,
        mut location: SessionLocation,
        analyst: Arc<dyn Analyst>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let bootstrap = bootstrap::resolve(&mut location, config.token_len);
        let peer = PeerId::random();
        let doc = Doc::new(peer.clone());
        if bootstrap.role == Role::Creator {
            doc.set_access_control(&peer, AccessStatus::Allowed);
        }

        let handle = connect(signaling, bootstrap.room.clone(), doc.clone()).await;
        let stage = bootstrap.initial_stage();
        let shared = Arc::new(Shared {
            doc: doc.clone(),
            gate: AdmissionGate::new(peer.clone(), stage),
            projection: Mutex::new(Projection::new(stage)),
            connection: handle.connection_id(),
        });

        let mut doc_subs = Vec::with_capacity(3);
        let weak = Arc::downgrade(&shared);
        doc_subs.push(doc.observe(Field::SharedInput, move |_, _| {
            with_shared(&weak, Shared::sync_text);
        }));
        let weak = Arc::downgrade(&shared);
        doc_subs.push(doc.observe(Field::SharedGraph, move |_, _| {
            with_shared(&weak, Shared::sync_graph);
        }));
        let weak = Arc::downgrade(&shared);
        let awareness = Arc::downgrade(handle.awareness());
        doc_subs.push(doc.observe(Field::AccessControl, move |_, _| {
            with_shared(&weak, |shared| {
                shared.sync_admission();
                if let Some(awareness) = awareness.upgrade() {
                    shared.sync_presence(&awareness);
                }
            });
        }));
        let weak = Arc::downgrade(&shared);
        let presence_sub = handle.awareness().on_change(move |awareness, _| {
            with_shared(&weak, |shared| shared.sync_presence(awareness));
        });

        // catch up on anything merged before the observers existed
        shared.sync_text();
        shared.sync_graph();
        shared.sync_admission();
        shared.sync_presence(handle.awareness());

        let name = config
            .display_name
            .clone()
            .unwrap_or_else(|| default_name(&peer));
        let color = color_for(&peer, &config.palette);
        handle
            .awareness()
            .set_local_state(PresenceUser::new(peer.clone(), name, color));

        tracing::info!(
            peer = %peer,
            room = %bootstrap.room,
            role = ?bootstrap.role,
            stage = %stage,
            online = handle.is_online(),
            "session started"
        );

        Ok(Self {
            shared,
            handle,
            location,
            bootstrap,
            analyst,
            artifacts: Mutex::new(LocalArtifacts::default()),
            doc_subs,
            presence_sub: Some(presence_sub),
        })
    }

    /// Local peer id
    #[inline]
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        self.shared.doc.peer_id()
    }

    /// Room token
    #[inline]
    #[must_use]
    pub fn room(&self) -> &RoomToken {
        &self.bootstrap.room
    }

    /// Creator or joiner
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.bootstrap.role
    }

    /// URL to share with collaborators
    #[must_use]
    pub fn invite_link(&self) -> &str {
        self.location.href()
    }

    /// Tab location after bootstrap
    #[must_use]
    pub fn location(&self) -> &SessionLocation {
        &self.location
    }

    /// Underlying document
    #[must_use]
    pub fn doc(&self) -> &Doc {
        &self.shared.doc
    }

    /// Presence state of this connection
    #[must_use]
    pub fn awareness(&self) -> &Arc<Awareness> {
        self.handle.awareness()
    }

    /// Whether the relay accepted us
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.handle.is_online()
    }

    /// Admission stage
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.shared.gate.stage()
    }

    /// What to render
    #[must_use]
    pub fn view(&self) -> View {
        self.shared.projection.lock().view()
    }

    /// Copy of the local projection
    #[must_use]
    pub fn projection(&self) -> Projection {
        self.shared.projection.lock().clone()
    }

    /// Projection revision counter
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.shared.projection.lock().revision()
    }

    /// Everyone connected, self included
    #[must_use]
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.shared.projection.lock().roster().to_vec()
    }

    /// Present peers awaiting admission; empty while gated
    #[must_use]
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.shared.projection.lock().pending().to_vec()
    }

    /// This peer's analysis results
    #[must_use]
    pub fn artifacts(&self) -> LocalArtifacts {
        self.artifacts.lock().clone()
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.stage() {
            Stage::Active => Ok(()),
            stage => Err(SessionError::NotAdmitted { stage }),
        }
    }

    fn current_graph(&self) -> Result<Arc<CausalGraph>, SessionError> {
        self.shared.doc.graph().ok_or(SessionError::NoGraph)
    }

    fn write_graph(&self, graph: CausalGraph) -> Arc<CausalGraph> {
        let graph = Arc::new(graph);
        self.shared
            .doc
            .transact(|txn| txn.set_graph(Some(Arc::clone(&graph))));
        graph
    }

    /// Replace the shared input with `text` (local typing)
    ///
    /// # Errors
    /// Returns [`SessionError::NotAdmitted`] while gated
    pub fn type_input(&self, text: &str) -> Result<(), SessionError> {
        self.ensure_active()?;
        // local state first, so the document observer sees an echo
        self.shared.projection.lock().apply_text(text);
        self.shared.doc.apply_local_text_edit(text);
        Ok(())
    }

    /// Append a dictation transcript to the shared input
    ///
    /// # Errors
    /// Returns [`SessionError::NotAdmitted`] while gated
    pub fn append_dictation(&self, transcript: &str) -> Result<(), SessionError> {
        self.ensure_active()?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Ok(());
        }
        let current = self.shared.doc.text();
        let piece = if current.is_empty() || current.ends_with(char::is_whitespace) {
            transcript.to_owned()
        } else {
            format!(" {transcript}")
        };
        self.shared.doc.append_text(&piece);
        Ok(())
    }

    /// Admit a pending peer
    ///
    /// Returns `false` if the peer was already admitted.
    ///
    /// # Errors
    /// Returns [`SessionError::NotAdmitted`] while gated
    pub fn admit(&self, peer: &PeerId) -> Result<bool, SessionError> {
        self.shared.gate.admit(&self.shared.doc, peer)
    }

    /// Hide a pending request locally; it comes back on the next tick
    pub fn dismiss(&self, peer: &PeerId) -> bool {
        self.shared.projection.lock().dismiss(peer)
    }

    /// Build a graph from the shared input and publish it
    ///
    /// # Errors
    /// Returns an error while gated or when the analyst fails
    pub async fn extract_graph(&self) -> Result<Arc<CausalGraph>, SessionError> {
        self.ensure_active()?;
        let text = self.shared.doc.text();
        let graph = self.analyst.extract_graph(&text).await?;
        tracing::info!(peer = %self.peer_id(), nodes = graph.nodes.len(), "publishing extracted graph");
        Ok(self.write_graph(graph))
    }

    /// Expand one node of the current graph and publish the result
    ///
    /// The result replaces whatever graph is current when it arrives, even
    /// if another peer wrote in the meantime.
    ///
    /// # Errors
    /// Returns an error while gated, without a graph, or when the analyst fails
    pub async fn expand_node(&self, node_id: &str) -> Result<Arc<CausalGraph>, SessionError> {
        self.ensure_active()?;
        let base = self.current_graph()?;
        let expanded = self.analyst.expand_node(node_id, &base).await?;
        tracing::info!(peer = %self.peer_id(), node = node_id, nodes = expanded.nodes.len(), "publishing expansion");
        Ok(self.write_graph(expanded))
    }

    /// Search evidence; kept locally
    ///
    /// # Errors
    /// Returns an error while gated or when the analyst fails
    pub async fn search_evidence(&self, query: &str) -> Result<Vec<Evidence>, SessionError> {
        self.ensure_active()?;
        let hits = self.analyst.search_evidence(query).await?;
        self.artifacts.lock().evidence.clone_from(&hits);
        Ok(hits)
    }

    /// Simulate the current graph; kept locally
    ///
    /// # Errors
    /// Returns an error while gated, without a graph, or when the analyst fails
    pub async fn run_simulation(&self) -> Result<SimulationResult, SessionError> {
        self.ensure_active()?;
        let graph = self.current_graph()?;
        let result = self.analyst.simulate(&graph).await?;
        self.artifacts.lock().simulation = Some(result.clone());
        Ok(result)
    }

    /// Verify the current graph; kept locally
    ///
    /// # Errors
    /// Returns an error while gated, without a graph, or when the analyst fails
    pub async fn run_verification(&self) -> Result<Vec<Check>, SessionError> {
        self.ensure_active()?;
        let graph = self.current_graph()?;
        let checks = self.analyst.verify(&graph).await?;
        self.artifacts.lock().checks.clone_from(&checks);
        Ok(checks)
    }

    /// Compile a report from the graph and local artifacts; kept locally
    ///
    /// # Errors
    /// Returns an error while gated, without a graph, or when the analyst fails
    pub async fn compile_report(&self) -> Result<Report, SessionError> {
        self.ensure_active()?;
        let graph = self.current_graph()?;
        let input = {
            let artifacts = self.artifacts.lock();
            ReportInput {
                graph: (*graph).clone(),
                evidence: artifacts.evidence.clone(),
                simulation: artifacts.simulation.clone(),
                checks: artifacts.checks.clone(),
            }
        };
        let report = self.analyst.compile_report(&input).await?;
        self.artifacts.lock().report = Some(report.clone());
        Ok(report)
    }

    /// Disconnect and stop observing; idempotent
    ///
    /// Writes already made stay in the room.
    pub fn leave(&mut self) {
        let Some(presence_sub) = self.presence_sub.take() else {
            return;
        };
        for sub in self.doc_subs.drain(..) {
            self.shared.doc.unobserve(sub);
        }
        self.handle.awareness().off(presence_sub);
        self.handle.disconnect();
        tracing::info!(peer = %self.peer_id(), room = %self.bootstrap.room, "session left");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::MockAnalyst;
    use crate::error::AnalysisError;
    use pretty_assertions::assert_eq;
    use scaffold_net::LocalRelay;

    fn home() -> SessionLocation {
        SessionLocation::new("https://scaffold.local/")
    }

    async fn creator_with(analyst: MockAnalyst) -> Session {
        Session::start_with_analyst(
            SessionConfig::default().with_heuristic_fallback(false),
            Arc::new(LocalRelay::new()),
            home(),
            Arc::new(analyst),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn creator_is_active_immediately() {
        let session = Session::start(SessionConfig::default(), Arc::new(LocalRelay::new()), home())
            .await
            .unwrap();
        assert_eq!(session.role(), Role::Creator);
        assert_eq!(session.stage(), Stage::Active);
        assert!(session.doc().is_allowed(session.peer_id()));
        assert!(session.invite_link().ends_with(&format!("#{}", session.room())));
    }

    #[tokio::test]
    async fn gated_peer_cannot_write() {
        let relay = Arc::new(LocalRelay::new());
        let session = Session::start(
            SessionConfig::default(),
            relay,
            SessionLocation::new("https://scaffold.local/#nobody-home"),
        )
        .await
        .unwrap();

        assert_eq!(session.stage(), Stage::Gated);
        assert!(matches!(session.view(), View::Waiting { .. }));
        assert!(matches!(
            session.type_input("hi"),
            Err(SessionError::NotAdmitted { stage: Stage::Gated })
        ));
        assert!(session.extract_graph().await.is_err());
        assert_eq!(session.doc().text(), "");
    }

    #[tokio::test]
    async fn typing_bumps_revision_exactly_once() {
        let session = Session::start(SessionConfig::default(), Arc::new(LocalRelay::new()), home())
            .await
            .unwrap();
        let before = session.revision();
        session.type_input("hello").unwrap();
        assert_eq!(session.revision(), before + 1);
        session.type_input("hello").unwrap();
        assert_eq!(session.revision(), before + 1);
    }

    #[tokio::test]
    async fn dictation_appends_with_spacing() {
        let session = Session::start(SessionConfig::default(), Arc::new(LocalRelay::new()), home())
            .await
            .unwrap();
        session.type_input("heat reduces yield.").unwrap();
        session.append_dictation("  pests reduce yield ").unwrap();
        session.append_dictation("   ").unwrap();
        assert_eq!(session.doc().text(), "heat reduces yield. pests reduce yield");
    }

    #[tokio::test]
    async fn failed_extraction_writes_nothing() {
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_extract_graph()
            .times(1)
            .returning(|_| Err(AnalysisError::Upstream("quota".into())));
        let session = creator_with(analyst).await;
        session.type_input("rain increases yield").unwrap();

        let err = session.extract_graph().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.doc().graph(), None);
    }

    #[tokio::test]
    async fn failed_extraction_falls_back_to_the_heuristic() {
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_extract_graph()
            .times(1)
            .returning(|_| Err(AnalysisError::Upstream("quota".into())));
        let session = Session::start_with_analyst(
            SessionConfig::default(),
            Arc::new(LocalRelay::new()),
            home(),
            Arc::new(analyst),
        )
        .await
        .unwrap();
        session.type_input("Rainfall increases crop yield.").unwrap();

        let graph = session.extract_graph().await.unwrap();
        assert!(!graph.nodes.is_empty());
        assert_eq!(session.doc().graph(), Some(graph));
    }

    #[tokio::test]
    async fn analyses_without_graph_fail_fast() {
        let session = creator_with(MockAnalyst::new()).await;
        assert!(matches!(session.run_simulation().await, Err(SessionError::NoGraph)));
        assert!(matches!(session.expand_node("x").await, Err(SessionError::NoGraph)));
    }

    #[tokio::test]
    async fn derived_artifacts_stay_local() {
        let session = Session::start(SessionConfig::default(), Arc::new(LocalRelay::new()), home())
            .await
            .unwrap();
        session
            .type_input("Rainfall increases soil moisture. Soil moisture boosts crop yield.")
            .unwrap();
        let graph = session.extract_graph().await.unwrap();
        assert_eq!(session.doc().graph(), Some(graph));

        let before = session.doc().state_vector();
        session.search_evidence("soil moisture").await.unwrap();
        session.run_simulation().await.unwrap();
        session.run_verification().await.unwrap();
        let report = session.compile_report().await.unwrap();

        let artifacts = session.artifacts();
        assert!(artifacts.simulation.is_some());
        assert_eq!(artifacts.checks.len(), 5);
        assert_eq!(artifacts.report, Some(report));
        assert_eq!(session.doc().state_vector(), before);
    }

    #[tokio::test]
    async fn leave_detaches_observers() {
        let mut session = Session::start(SessionConfig::default(), Arc::new(LocalRelay::new()), home())
            .await
            .unwrap();
        let doc = session.doc().clone();
        session.leave();
        session.leave();
        assert_eq!(doc.observer_counts(), (0, 0));
        assert!(!session.is_online());
    }
}
