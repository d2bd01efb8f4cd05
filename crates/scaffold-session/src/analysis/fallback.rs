use super::{Analyst, Check, Evidence, HeuristicAnalyst, Report, ReportInput, SimulationResult};
use crate::error::AnalysisError;
use async_trait::async_trait;
use scaffold_crdt::CausalGraph;
use std::sync::Arc;

/// Primary analyst with an offline safety net
///
/// Any error from the primary is logged and the same request is answered by
/// a [`HeuristicAnalyst`].
#[derive(Clone)]
pub struct FallbackAnalyst {
    primary: Arc<dyn Analyst>,
    fallback: HeuristicAnalyst,
}

impl std::fmt::Debug for FallbackAnalyst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackAnalyst")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl FallbackAnalyst {
    /// Wrap `primary` with a default heuristic fallback
    #[must_use]
    pub fn new(primary: Arc<dyn Analyst>) -> Self {
        Self {
            primary,
            fallback: HeuristicAnalyst::new(),
        }
    }

    /// With a specific fallback
    #[must_use]
    pub fn with_fallback(mut self, fallback: HeuristicAnalyst) -> Self {
        self.fallback = fallback;
        self
    }
}

fn degraded(operation: &'static str, err: &AnalysisError) {
    tracing::warn!(operation, error = %err, "primary analyst failed, using heuristic fallback");
}

#[async_trait]
impl Analyst for FallbackAnalyst {
    async fn extract_graph(&self, text: &str) -> Result<CausalGraph, AnalysisError> {
        match self.primary.extract_graph(text).await {
            Ok(graph) => Ok(graph),
            Err(err) => {
                degraded("extract_graph", &err);
                self.fallback.extract_graph(text).await
            }
        }
    }

    async fn expand_node(
        &self,
        node_id: &str,
        base: &CausalGraph,
    ) -> Result<CausalGraph, AnalysisError> {
        match self.primary.expand_node(node_id, base).await {
            Ok(graph) => Ok(graph),
            Err(err) => {
                degraded("expand_node", &err);
                self.fallback.expand_node(node_id, base).await
            }
        }
    }

    async fn search_evidence(&self, query: &str) -> Result<Vec<Evidence>, AnalysisError> {
        match self.primary.search_evidence(query).await {
            Ok(hits) => Ok(hits),
            Err(err) => {
                degraded("search_evidence", &err);
                self.fallback.search_evidence(query).await
            }
        }
    }

    async fn simulate(&self, graph: &CausalGraph) -> Result<SimulationResult, AnalysisError> {
        match self.primary.simulate(graph).await {
            Ok(result) => Ok(result),
            Err(err) => {
                degraded("simulate", &err);
                self.fallback.simulate(graph).await
            }
        }
    }

    async fn verify(&self, graph: &CausalGraph) -> Result<Vec<Check>, AnalysisError> {
        match self.primary.verify(graph).await {
            Ok(checks) => Ok(checks),
            Err(err) => {
                degraded("verify", &err);
                self.fallback.verify(graph).await
            }
        }
    }

    async fn compile_report(&self, input: &ReportInput) -> Result<Report, AnalysisError> {
        match self.primary.compile_report(input).await {
            Ok(report) => Ok(report),
            Err(err) => {
                degraded("compile_report", &err);
                self.fallback.compile_report(input).await
            }
        }
    }
}
