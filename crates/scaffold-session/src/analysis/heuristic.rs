//! Offline, deterministic analyst
//!
//! Causal phrases are pulled out with a regular expression, simulations
//! propagate linearly along edges, and the report is plain markdown. Also
//! answers for a supplied analyst that fails.

use super::{Analyst, Check, Evidence, Report, ReportInput, SimulationResult, SimulationStep};
use crate::error::AnalysisError;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scaffold_crdt::{CausalGraph, GraphEdge, GraphIssue, GraphNode, NodeKind};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt::Write as _;

static RELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<cause>.+?)\s+(?P<verb>increases?|raises?|boosts?|drives?|causes?|improves?|reduces?|decreases?|lowers?|limits?)\s+(?P<effect>.+)$",
    )
    .expect("relation pattern is valid")
});

const EDGE_STRENGTH: f64 = 0.6;

/// Offline analyst
#[derive(Debug, Clone)]
pub struct HeuristicAnalyst {
    steps: usize,
}

impl Default for HeuristicAnalyst {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicAnalyst {
    /// Analyst running 12 simulation steps
    #[must_use]
    pub fn new() -> Self {
        Self { steps: 12 }
    }

    /// With simulation steps
    #[inline]
    #[must_use]
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }
}

fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_owned()
}

fn clean_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_owned()
}

/// `(cause, relationship, effect, weight)` of one sentence
fn parse_sentence(sentence: &str) -> Option<(String, &'static str, String, f64)> {
    let caps = RELATION.captures(sentence.trim())?;
    let verb = caps["verb"].to_lowercase();
    let negative = ["reduce", "decrease", "lower", "limit"]
        .iter()
        .any(|v| verb.starts_with(v));
    let (relationship, weight) = if negative {
        ("decreases", -EDGE_STRENGTH)
    } else {
        ("increases", EDGE_STRENGTH)
    };
    Some((
        clean_label(&caps["cause"]),
        relationship,
        clean_label(&caps["effect"]),
        weight,
    ))
}

fn extract(text: &str) -> Result<CausalGraph, AnalysisError> {
    if text.trim().is_empty() {
        return Err(AnalysisError::EmptyInput);
    }

    let mut labels: Vec<(String, String)> = Vec::new();
    let mut edges: Vec<GraphEdge> = Vec::new();
    for sentence in text.split(['.', ';', '\n']) {
        let Some((cause, relationship, effect, weight)) = parse_sentence(sentence) else {
            continue;
        };
        let (source, target) = (slug(&cause), slug(&effect));
        if source.is_empty() || target.is_empty() || source == target {
            continue;
        }
        for (id, label) in [(&source, cause), (&target, effect)] {
            if !labels.iter().any(|(known, _)| known == id) {
                labels.push((id.clone(), label));
            }
        }
        if !edges.iter().any(|e| e.source == source && e.target == target) {
            edges.push(GraphEdge::new(source, target, relationship, weight));
        }
    }
    if edges.is_empty() {
        return Err(AnalysisError::NothingExtracted);
    }

    let nodes = labels
        .into_iter()
        .map(|(id, label)| {
            let has_in = edges.iter().any(|e| e.target == id);
            let has_out = edges.iter().any(|e| e.source == id);
            let kind = match (has_in, has_out) {
                (false, _) => NodeKind::Driver,
                (true, false) => NodeKind::Outcome,
                (true, true) => NodeKind::Mediator,
            };
            GraphNode::new(id, label, kind)
        })
        .collect();
    Ok(CausalGraph { nodes, edges })
}

fn expand(node_id: &str, base: &CausalGraph) -> Result<CausalGraph, AnalysisError> {
    let node = base
        .node(node_id)
        .ok_or_else(|| AnalysisError::UnknownNode(node_id.to_owned()))?;
    let upstream = format!("{node_id}-upstream");
    let downstream = format!("{node_id}-downstream");
    let addition = CausalGraph::new()
        .with_node(GraphNode::new(
            upstream.clone(),
            format!("Upstream driver of {}", node.label),
            NodeKind::Driver,
        ))
        .with_node(GraphNode::new(
            downstream.clone(),
            format!("Downstream effect of {}", node.label),
            NodeKind::Outcome,
        ))
        .with_edge(GraphEdge::new(upstream, node_id, "increases", 0.4))
        .with_edge(GraphEdge::new(node_id, downstream, "increases", 0.4));
    Ok(base.merge_expansion(&addition))
}

fn simulate_graph(graph: &CausalGraph, steps: usize) -> Result<SimulationResult, AnalysisError> {
    if graph.is_empty() {
        return Err(AnalysisError::EmptyGraph);
    }
    let mut values: BTreeMap<String, f64> =
        graph.nodes.iter().map(|n| (n.id.clone(), n.value)).collect();
    let mut trace = vec![SimulationStep {
        step: 0,
        values: values.clone(),
    }];

    for step in 1..=steps {
        let mut next = values.clone();
        for node in &graph.nodes {
            // each source pushes by how far it sits above or below its midpoint
            let pushes: Vec<f64> = graph
                .incoming(&node.id)
                .filter_map(|edge| {
                    let source = graph.node(&edge.source)?;
                    let value = values.get(&edge.source)?;
                    let span = (source.max - source.min).max(f64::EPSILON);
                    Some(edge.weight * ((value - source.min) / span - 0.5))
                })
                .collect();
            if pushes.is_empty() {
                continue;
            }
            let influence: f64 = pushes.iter().sum();
            let value = (node.value + influence * (node.max - node.min)).clamp(node.min, node.max);
            next.insert(node.id.clone(), value);
        }
        let settled = next == values;
        values = next;
        trace.push(SimulationStep {
            step,
            values: values.clone(),
        });
        if settled {
            break;
        }
    }

    let narrative = graph
        .nodes
        .iter()
        .filter_map(|n| {
            let to = values.get(&n.id).copied()?;
            ((to - n.value).abs() > 1e-6).then(|| {
                let direction = if to > n.value { "rises" } else { "falls" };
                format!("{} {direction} from {:.1} to {to:.1}.", n.label, n.value)
            })
        })
        .collect::<Vec<_>>()
        .join(" ");

    Ok(SimulationResult {
        steps: trace,
        final_values: values,
        narrative: if narrative.is_empty() {
            String::from("No variable moved from its baseline.")
        } else {
            narrative
        },
    })
}

fn verify_graph(graph: &CausalGraph) -> Vec<Check> {
    let issues = graph.integrity_issues();
    let duplicates = issues
        .iter()
        .filter(|i| matches!(i, GraphIssue::DuplicateNode(_)))
        .count();
    let dangling = issues.len() - duplicates;
    let out_of_range = graph
        .edges
        .iter()
        .filter(|e| !(-1.0..=1.0).contains(&e.weight))
        .count();

    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Driver | NodeKind::Intervention))
        .map(|n| n.id.as_str())
        .collect();
    while let Some(id) = queue.pop_front() {
        if reached.insert(id) {
            queue.extend(graph.outgoing(id).map(|e| e.target.as_str()));
        }
    }
    let unreachable: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Outcome && !reached.contains(n.id.as_str()))
        .map(|n| n.label.as_str())
        .collect();

    vec![
        Check::new("unique node ids", duplicates == 0, format!("{duplicates} duplicate(s)")),
        Check::new(
            "edges reference existing nodes",
            dangling == 0,
            format!("{dangling} dangling edge(s)"),
        ),
        Check::new(
            "weights within [-1, 1]",
            out_of_range == 0,
            format!("{out_of_range} edge(s) out of range"),
        ),
        Check::new(
            "outcomes reachable from a driver",
            unreachable.is_empty(),
            format!("unreachable: [{}]", unreachable.join(", ")),
        ),
    ]
}

fn render_report(input: &ReportInput) -> Report {
    let graph = &input.graph;
    let title = graph
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Outcome)
        .map_or_else(|| String::from("Causal analysis"), |n| format!("What drives {}?", n.label));
    let label = |id: &str| graph.node(id).map_or_else(|| id.to_owned(), |n| n.label.clone());

    let mut md = format!("# {title}\n\n## Relationships\n\n");
    for edge in &graph.edges {
        let _ = writeln!(
            md,
            "- {} {} {} (weight {:+.2})",
            label(&edge.source),
            edge.relationship,
            label(&edge.target),
            edge.weight
        );
    }
    if let Some(sim) = &input.simulation {
        let _ = writeln!(md, "\n## Simulation\n\n{}", sim.narrative);
    }
    if !input.evidence.is_empty() {
        md.push_str("\n## Evidence\n\n");
        for ev in &input.evidence {
            let _ = writeln!(md, "- {} ({}): {}", ev.title, ev.source, ev.snippet);
        }
    }
    if !input.checks.is_empty() {
        md.push_str("\n## Checks\n\n");
        for check in &input.checks {
            let mark = if check.passed { "x" } else { " " };
            let _ = writeln!(md, "- [{mark}] {}: {}", check.name, check.detail);
        }
    }

    Report {
        title,
        markdown: md,
        generated_at: Utc::now(),
    }
}

#[async_trait]
impl Analyst for HeuristicAnalyst {
    async fn extract_graph(&self, text: &str) -> Result<CausalGraph, AnalysisError> {
        let graph = extract(text)?;
        tracing::debug!(nodes = graph.nodes.len(), edges = graph.edges.len(), "extracted graph");
        Ok(graph)
    }

    async fn expand_node(
        &self,
        node_id: &str,
        base: &CausalGraph,
    ) -> Result<CausalGraph, AnalysisError> {
        expand(node_id, base)
    }

    /// No corpus is available offline, so every valid query finds nothing
    async fn search_evidence(&self, query: &str) -> Result<Vec<Evidence>, AnalysisError> {
        if query.trim().is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        Ok(Vec::new())
    }

    async fn simulate(&self, graph: &CausalGraph) -> Result<SimulationResult, AnalysisError> {
        simulate_graph(graph, self.steps)
    }

    async fn verify(&self, graph: &CausalGraph) -> Result<Vec<Check>, AnalysisError> {
        if graph.is_empty() {
            return Err(AnalysisError::EmptyGraph);
        }
        Ok(verify_graph(graph))
    }

    async fn compile_report(&self, input: &ReportInput) -> Result<Report, AnalysisError> {
        if input.graph.is_empty() {
            return Err(AnalysisError::EmptyGraph);
        }
        Ok(render_report(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEXT: &str = "Rainfall increases soil moisture. Soil moisture boosts crop yield; \
                        pests reduce crop yield.";

    #[tokio::test]
    async fn extracts_relations_and_kinds() {
        let graph = HeuristicAnalyst::new().extract_graph(TEXT).await.unwrap();

        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["rainfall", "soil-moisture", "crop-yield", "pests"]);
        assert_eq!(graph.node("rainfall").unwrap().kind, NodeKind::Driver);
        assert_eq!(graph.node("soil-moisture").unwrap().kind, NodeKind::Mediator);
        assert_eq!(graph.node("crop-yield").unwrap().kind, NodeKind::Outcome);

        let pests = graph.outgoing("pests").next().unwrap();
        assert_eq!(pests.relationship, "decreases");
        assert!(pests.weight < 0.0);
        assert!(graph.integrity_issues().is_empty());
    }

    #[tokio::test]
    async fn extraction_errors() {
        let analyst = HeuristicAnalyst::new();
        assert_eq!(analyst.extract_graph("  ").await, Err(AnalysisError::EmptyInput));
        assert_eq!(
            analyst.extract_graph("nothing causal here").await,
            Err(AnalysisError::NothingExtracted)
        );
    }

    #[tokio::test]
    async fn expansion_keeps_base_and_adds_neighbours() {
        let analyst = HeuristicAnalyst::new();
        let base = analyst.extract_graph(TEXT).await.unwrap();
        let expanded = analyst.expand_node("pests", &base).await.unwrap();

        assert_eq!(expanded.nodes.len(), base.nodes.len() + 2);
        assert!(expanded.node("pests-upstream").is_some());
        assert!(base.node("pests-upstream").is_none());
        assert_eq!(analyst.expand_node("pests", &expanded).await.unwrap(), expanded);
        assert_eq!(
            analyst.expand_node("nope", &base).await,
            Err(AnalysisError::UnknownNode("nope".into()))
        );
    }

    #[tokio::test]
    async fn simulation_moves_downstream_nodes() {
        let graph = CausalGraph::new()
            .with_node(GraphNode::new("rain", "Rainfall", NodeKind::Driver).with_value(90.0))
            .with_node(GraphNode::new("yield", "Crop yield", NodeKind::Outcome))
            .with_edge(GraphEdge::new("rain", "yield", "increases", 0.5));
        let result = HeuristicAnalyst::new().simulate(&graph).await.unwrap();

        assert_eq!(result.steps[0].values["yield"], 50.0);
        assert!((result.final_values["yield"] - 70.0).abs() < 1e-9);
        assert_eq!(result.final_values["rain"], 90.0);
        assert!(result.narrative.starts_with("Crop yield rises"));

        let err = HeuristicAnalyst::new().simulate(&CausalGraph::new()).await.unwrap_err();
        assert_eq!(err, AnalysisError::EmptyGraph);
    }

    #[tokio::test]
    async fn verification_flags_contract_violations() {
        let graph = CausalGraph::new()
            .with_node(GraphNode::new("a", "A", NodeKind::Driver))
            .with_node(GraphNode::new("a", "A again", NodeKind::Driver))
            .with_node(GraphNode::new("z", "Lonely outcome", NodeKind::Outcome))
            .with_edge(GraphEdge::new("a", "ghost", "increases", 2.0));
        let checks = HeuristicAnalyst::new().verify(&graph).await.unwrap();
        let failed: Vec<&str> = checks.iter().filter(|c| !c.passed).map(|c| c.name.as_str()).collect();
        assert_eq!(
            failed,
            vec![
                "unique node ids",
                "edges reference existing nodes",
                "weights within [-1, 1]",
                "outcomes reachable from a driver"
            ]
        );
    }

    #[tokio::test]
    async fn report_covers_every_section() {
        let analyst = HeuristicAnalyst::new();
        let graph = analyst.extract_graph(TEXT).await.unwrap();
        let input = ReportInput {
            simulation: Some(analyst.simulate(&graph).await.unwrap()),
            checks: analyst.verify(&graph).await.unwrap(),
            evidence: vec![Evidence::new("Field trial", "Yield up 12%", "trial.pdf")],
            graph,
        };
        let report = analyst.compile_report(&input).await.unwrap();

        assert_eq!(report.title, "What drives crop yield?");
        for heading in ["## Relationships", "## Simulation", "## Evidence", "## Checks"] {
            assert!(report.markdown.contains(heading), "missing {heading}");
        }
        assert_eq!(analyst.search_evidence("rainfall").await, Ok(Vec::new()));
    }
}
