//! Room simulator
//!
//! Drives a creator and several joiners through one in-process room:
//! admission, interleaved concurrent edits, graph extraction and competing
//! expansions. Afterwards every replica must agree. Runs are reproducible
//! from the seed, up to task scheduling.

use crate::admission::Stage;
use crate::bootstrap::SessionLocation;
use crate::config::SessionConfig;
use crate::projection::View;
use crate::session::Session;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use scaffold_crdt::{CausalGraph, PeerId};
use scaffold_net::{LocalRelay, RoomToken, Signaling};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(5);

const SENTENCES: &[&str] = &[
    "Rainfall increases soil moisture.",
    "Soil moisture boosts crop yield.",
    "Heat reduces crop yield.",
    "Irrigation increases soil moisture.",
    "Pests reduce crop yield.",
    "Fertilizer improves soil quality.",
    "Soil quality drives crop yield.",
    "Drought lowers soil moisture.",
];

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct RoomSimulationConfig {
    /// Random seed for the edit script
    pub seed: u64,
    /// Peers in the room, creator included
    pub peers: usize,
    /// Edits each peer makes
    pub edits_per_peer: usize,
    /// Whether to run the competing expansions
    pub expand: bool,
    /// How long to wait for each convergence point
    pub timeout: Duration,
}

impl Default for RoomSimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            peers: 3,
            edits_per_peer: 8,
            expand: true,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Something that went wrong during a run
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// A gated peer was shown the workspace
    WorkspaceLeaked {
        /// Peer that saw it
        peer: PeerId,
    },
    /// A joiner never became active
    AdmissionTimedOut {
        /// Peer still gated
        peer: PeerId,
    },
    /// Replicas disagree on the shared input
    TextDiverged {
        /// Distinct texts observed
        variants: usize,
    },
    /// Replicas disagree on the shared graph
    GraphDiverged,
    /// The surviving graph is neither competing write
    TornGraph,
    /// A session operation failed
    StepFailed {
        /// Which step
        step: &'static str,
        /// Error text
        error: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkspaceLeaked { peer } => write!(f, "gated peer {peer} saw the workspace"),
            Self::AdmissionTimedOut { peer } => write!(f, "peer {peer} was never admitted"),
            Self::TextDiverged { variants } => write!(f, "shared input diverged into {variants} variants"),
            Self::GraphDiverged => write!(f, "shared graph diverged"),
            Self::TornGraph => write!(f, "shared graph matches neither concurrent write"),
            Self::StepFailed { step, error } => write!(f, "{step} failed: {error}"),
        }
    }
}

/// Counters collected during a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoomSimulationStats {
    /// Joiners admitted
    pub admitted: usize,
    /// Edits issued across all peers
    pub edits: usize,
    /// Expansions published
    pub expansions: usize,
    /// Characters in the converged input
    pub final_text_chars: usize,
    /// Nodes in the converged graph
    pub final_graph_nodes: usize,
}

/// Final report from the simulator
#[derive(Debug, Clone)]
pub struct RoomSimulationReport {
    /// Configuration used
    pub config: RoomSimulationConfig,
    /// Room the peers met in
    pub room: Option<RoomToken>,
    /// Counters
    pub stats: RoomSimulationStats,
    /// Everything that went wrong
    pub violations: Vec<Violation>,
    /// Wall time
    pub elapsed: Duration,
}

impl RoomSimulationReport {
    /// Whether every replica agreed and every step succeeded
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Machine readable summary
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "seed": self.config.seed,
            "peers": self.config.peers,
            "room": self.room.as_ref().map(RoomToken::as_str),
            "passed": self.passed(),
            "stats": self.stats,
            "violations": self.violations.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "elapsed_ms": u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Human readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Room Simulation Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Peers: {}\n", self.config.peers));
        if let Some(room) = &self.room {
            report.push_str(&format!("Room: {room}\n"));
        }
        report.push_str(&format!("Admitted: {}\n", self.stats.admitted));
        report.push_str(&format!("Edits: {}\n", self.stats.edits));
        report.push_str(&format!("Expansions: {}\n", self.stats.expansions));
        report.push_str(&format!("Final text: {} chars\n", self.stats.final_text_chars));
        report.push_str(&format!("Final graph: {} nodes\n", self.stats.final_graph_nodes));
        report.push_str(&format!("Elapsed: {:?}\n\n", self.elapsed));

        if self.violations.is_empty() {
            report.push_str("All replicas converged.\n");
        } else {
            report.push_str(&format!("Violations ({}):\n", self.violations.len()));
            for violation in &self.violations {
                report.push_str(&format!("  - {violation}\n"));
            }
        }
        report
    }
}

async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL).await;
    }
}

fn texts_agree(sessions: &[Session]) -> bool {
    let Some((first, rest)) = sessions.split_first() else {
        return true;
    };
    let text = first.doc().text();
    rest.iter().all(|s| s.doc().text() == text)
}

fn graphs_agree(sessions: &[Session]) -> bool {
    let Some((first, rest)) = sessions.split_first() else {
        return true;
    };
    let graph = first.doc().graph();
    rest.iter().all(|s| s.doc().graph() == graph)
}

/// Insert `sentence` at a random sentence boundary of `text`
fn insert_at_boundary(rng: &mut StdRng, text: &str, sentence: &str) -> String {
    let mut boundaries = vec![0];
    boundaries.extend(text.match_indices('.').map(|(i, _)| i + 1));
    boundaries.push(text.len());
    let at = boundaries[rng.random_range(0..boundaries.len())];
    let (head, tail) = text.split_at(at);
    match (head.is_empty(), tail.is_empty()) {
        (true, true) => sentence.to_owned(),
        (true, false) => format!("{sentence} {tail}"),
        _ => format!("{head} {sentence}{tail}"),
    }
}

/// Run one room simulation on an in-process relay
pub async fn run_room_simulation(config: RoomSimulationConfig) -> RoomSimulationReport {
    let relay: Arc<dyn Signaling> = Arc::new(LocalRelay::new());
    run_room_simulation_on(config, relay).await
}

/// Run one room simulation over `signaling`
pub async fn run_room_simulation_on(
    config: RoomSimulationConfig,
    signaling: Arc<dyn Signaling>,
) -> RoomSimulationReport {
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = RoomSimulationStats::default();
    let mut violations = Vec::new();

    let finish = |room: Option<RoomToken>, stats: RoomSimulationStats, violations: Vec<Violation>| {
        RoomSimulationReport {
            config: config.clone(),
            room,
            stats,
            violations,
            elapsed: started.elapsed(),
        }
    };

    // Phase 1: creator opens a room, joiners follow the invite link
    let creator = match Session::start(
        SessionConfig::new().with_display_name("Creator"),
        Arc::clone(&signaling),
        SessionLocation::new("https://scaffold.local/"),
    )
    .await
    {
        Ok(session) => session,
        Err(err) => {
            violations.push(Violation::StepFailed { step: "start creator", error: err.to_string() });
            return finish(None, stats, violations);
        }
    };
    let room = creator.room().clone();
    let invite = creator.invite_link().to_owned();

    let mut sessions = vec![creator];
    for i in 1..config.peers.max(1) {
        match Session::start(
            SessionConfig::new().with_display_name(format!("Joiner {i}")),
            Arc::clone(&signaling),
            SessionLocation::new(invite.clone()),
        )
        .await
        {
            Ok(session) => sessions.push(session),
            Err(err) => violations.push(Violation::StepFailed { step: "start joiner", error: err.to_string() }),
        }
    }

    for joiner in &sessions[1..] {
        if matches!(joiner.view(), View::Workspace { .. }) {
            violations.push(Violation::WorkspaceLeaked { peer: joiner.peer_id().clone() });
        }
    }

    // Phase 2: admission
    let joiner_ids: Vec<PeerId> = sessions[1..].iter().map(|s| s.peer_id().clone()).collect();
    let creator = &sessions[0];
    wait_until(config.timeout, || {
        let pending = creator.pending_requests();
        joiner_ids.iter().all(|id| pending.iter().any(|p| &p.peer_id == id))
    })
    .await;
    for request in creator.pending_requests() {
        match creator.admit(&request.peer_id) {
            Ok(true) => stats.admitted += 1,
            Ok(false) => {}
            Err(err) => violations.push(Violation::StepFailed { step: "admit", error: err.to_string() }),
        }
    }
    wait_until(config.timeout, || sessions.iter().all(|s| s.stage() == Stage::Active)).await;
    for session in &sessions {
        if session.stage() != Stage::Active {
            violations.push(Violation::AdmissionTimedOut { peer: session.peer_id().clone() });
        }
    }
    tracing::info!(room = %room, admitted = stats.admitted, "admission phase done");

    // Phase 3: interleaved edits without waiting for delivery
    for _ in 0..config.edits_per_peer {
        for session in &sessions {
            if session.stage() != Stage::Active {
                continue;
            }
            let sentence = SENTENCES.choose(&mut rng).copied().unwrap_or(SENTENCES[0]);
            let result = if rng.random_bool(0.5) {
                session.append_dictation(sentence)
            } else {
                let next = insert_at_boundary(&mut rng, &session.doc().text(), sentence);
                session.type_input(&next)
            };
            match result {
                Ok(()) => stats.edits += 1,
                Err(err) => violations.push(Violation::StepFailed { step: "edit", error: err.to_string() }),
            }
        }
        tokio::task::yield_now().await;
    }

    if !wait_until(config.timeout, || texts_agree(&sessions)).await {
        let mut texts: Vec<String> = sessions.iter().map(|s| s.doc().text()).collect();
        texts.sort();
        texts.dedup();
        violations.push(Violation::TextDiverged { variants: texts.len() });
    }
    stats.final_text_chars = sessions[0].doc().text().chars().count();

    // Phase 4: extraction, then competing expansions
    if let Err(err) = sessions[0].extract_graph().await {
        violations.push(Violation::StepFailed { step: "extract", error: err.to_string() });
        return finish(Some(room), stats, violations);
    }

    if config.expand {
        if !wait_until(config.timeout, || graphs_agree(&sessions)).await {
            violations.push(Violation::GraphDiverged);
        }
        let mut ids: Vec<String> = sessions[0]
            .doc()
            .graph()
            .map(|g| g.nodes.iter().map(|n| n.id.clone()).collect())
            .unwrap_or_default();
        ids.shuffle(&mut rng);

        let writers: Vec<&Session> = sessions.iter().take(2).collect();
        let expansions = futures::future::join_all(
            writers
                .iter()
                .zip(ids.iter())
                .map(|(session, id)| session.expand_node(id)),
        )
        .await;

        let mut written: Vec<CausalGraph> = Vec::new();
        for result in expansions {
            match result {
                Ok(graph) => {
                    stats.expansions += 1;
                    written.push((*graph).clone());
                }
                Err(err) => violations.push(Violation::StepFailed { step: "expand", error: err.to_string() }),
            }
        }

        if wait_until(config.timeout, || graphs_agree(&sessions)).await {
            let survivor = sessions[0].doc().graph();
            if !written.is_empty() && !survivor.is_some_and(|g| written.iter().any(|w| *w == *g)) {
                violations.push(Violation::TornGraph);
            }
        } else {
            violations.push(Violation::GraphDiverged);
        }
    } else if !wait_until(config.timeout, || graphs_agree(&sessions)).await {
        violations.push(Violation::GraphDiverged);
    }
    stats.final_graph_nodes = sessions[0].doc().graph().map_or(0, |g| g.nodes.len());

    for session in &mut sessions {
        session.leave();
    }
    tracing::info!(room = %room, violations = violations.len(), "simulation finished");
    finish(Some(room), stats, violations)
}
