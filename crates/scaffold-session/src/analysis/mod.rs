//! Analysis collaborator contract
//!
//! Analyses are opaque async request/response calls. The session writes
//! graph results back into the shared document; every other result stays
//! in this peer's [`LocalArtifacts`].

mod fallback;
mod heuristic;

pub use fallback::FallbackAnalyst;
pub use heuristic::HeuristicAnalyst;

use crate::error::AnalysisError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scaffold_crdt::CausalGraph;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One piece of supporting evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Short title
    pub title: String,
    /// Relevant excerpt
    pub snippet: String,
    /// Where it came from
    pub source: String,
    /// Match score in `[0, 1]`
    #[serde(default)]
    pub relevance: f64,
}

impl Evidence {
    /// Create evidence with zero relevance
    #[must_use]
    pub fn new(title: impl Into<String>, snippet: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            snippet: snippet.into(),
            source: source.into(),
            relevance: 0.0,
        }
    }
}

/// Node values after one propagation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStep {
    /// Step number; 0 is the baseline
    pub step: usize,
    /// Value per node id
    pub values: BTreeMap<String, f64>,
}

/// Outcome of a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Trace, baseline first
    pub steps: Vec<SimulationStep>,
    /// Value per node id after the last step
    pub final_values: BTreeMap<String, f64>,
    /// Plain-language summary
    pub narrative: String,
}

/// One verification check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// What was checked
    pub name: String,
    /// Whether it held
    pub passed: bool,
    /// Explanation
    pub detail: String,
}

impl Check {
    fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Everything a report is compiled from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportInput {
    /// Graph at compile time
    pub graph: CausalGraph,
    /// Evidence gathered by this peer
    pub evidence: Vec<Evidence>,
    /// Latest simulation, if run
    pub simulation: Option<SimulationResult>,
    /// Latest verification, if run
    pub checks: Vec<Check>,
}

/// Compiled report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Title
    pub title: String,
    /// Markdown body
    pub markdown: String,
    /// Compile time
    pub generated_at: DateTime<Utc>,
}

/// Per-peer analysis results; never replicated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalArtifacts {
    /// Last evidence search
    pub evidence: Vec<Evidence>,
    /// Last simulation
    pub simulation: Option<SimulationResult>,
    /// Last verification
    pub checks: Vec<Check>,
    /// Last report
    pub report: Option<Report>,
}

/// Analysis collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Build a causal graph from free text
    async fn extract_graph(&self, text: &str) -> Result<CausalGraph, AnalysisError>;

    /// Return `base` with new nodes and edges around `node_id` folded in
    async fn expand_node(&self, node_id: &str, base: &CausalGraph)
        -> Result<CausalGraph, AnalysisError>;

    /// Find evidence for a query
    async fn search_evidence(&self, query: &str) -> Result<Vec<Evidence>, AnalysisError>;

    /// Run a what-if simulation over the graph
    async fn simulate(&self, graph: &CausalGraph) -> Result<SimulationResult, AnalysisError>;

    /// Check the graph for structural problems
    async fn verify(&self, graph: &CausalGraph) -> Result<Vec<Check>, AnalysisError>;

    /// Compile a report
    async fn compile_report(&self, input: &ReportInput) -> Result<Report, AnalysisError>;
}
