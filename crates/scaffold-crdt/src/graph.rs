//! Causal graph snapshot model
//!
//! The document replicates a [`CausalGraph`] as one opaque value. Nothing in
//! this crate inspects or validates a snapshot; node id uniqueness and edge
//! endpoint existence are obligations of whoever builds the snapshot.
//! [`CausalGraph::integrity_issues`] exists for those callers.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Role a node plays in the causal model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Upstream cause
    #[default]
    Driver,
    /// Intermediate variable
    Mediator,
    /// Observed effect
    Outcome,
    /// Lever that can be pulled in a simulation
    Intervention,
}

/// A variable in the causal graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique within one snapshot
    pub id: String,
    /// Human-readable label
    pub label: String,
    /// Node role
    #[serde(default)]
    pub kind: NodeKind,
    /// Baseline value used by simulations
    #[serde(default)]
    pub value: f64,
    /// Lower simulation bound
    #[serde(default)]
    pub min: f64,
    /// Upper simulation bound
    #[serde(default = "default_max")]
    pub max: f64,
    /// Optional unit label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

fn default_max() -> f64 {
    100.0
}

impl GraphNode {
    /// Create node with default simulation parameters
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            value: 50.0,
            min: 0.0,
            max: default_max(),
            unit: None,
        }
    }

    /// With baseline value
    #[inline]
    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// With simulation bounds
    #[inline]
    #[must_use]
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

/// A directed causal link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Relationship label ("increases", "inhibits", ...)
    pub relationship: String,
    /// Signed strength in `[-1, 1]`
    pub weight: f64,
}

impl GraphEdge {
    /// Create edge
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: impl Into<String>,
        weight: f64,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relationship: relationship.into(),
            weight,
        }
    }

    /// Identity used when merging expansions
    fn key(&self) -> (&str, &str, &str) {
        (&self.source, &self.target, &self.relationship)
    }
}

/// Whole-graph snapshot, the unit of replication for the graph field
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CausalGraph {
    /// Nodes
    pub nodes: Vec<GraphNode>,
    /// Edges
    pub edges: Vec<GraphEdge>,
}

/// Contract violation found in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    /// Two nodes share an id
    DuplicateNode(String),
    /// Edge references a node id not in the snapshot
    DanglingEdge {
        /// Edge source
        source: String,
        /// Edge target
        target: String,
    },
}

impl CausalGraph {
    /// Empty graph
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With node
    #[must_use]
    pub fn with_node(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// With edge
    #[must_use]
    pub fn with_edge(mut self, edge: GraphEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Look up a node by id
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Whether the graph has no nodes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Edges pointing into `id`
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Edges leaving `id`
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Report duplicate node ids and dangling edges
    #[must_use]
    pub fn integrity_issues(&self) -> Vec<GraphIssue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                issues.push(GraphIssue::DuplicateNode(node.id.clone()));
            }
        }
        for edge in &self.edges {
            if !seen.contains(edge.source.as_str()) || !seen.contains(edge.target.as_str()) {
                issues.push(GraphIssue::DanglingEdge {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                });
            }
        }
        issues
    }

    /// Produce a new snapshot with `addition` folded in
    ///
    /// Nodes are matched by id and edges by (source, target, relationship);
    /// existing entries win. `self` is left untouched.
    #[must_use]
    pub fn merge_expansion(&self, addition: &CausalGraph) -> CausalGraph {
        let mut merged = self.clone();
        let known: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        for node in &addition.nodes {
            if !known.contains(node.id.as_str()) {
                merged.nodes.push(node.clone());
            }
        }
        let edges: HashSet<(&str, &str, &str)> = self.edges.iter().map(GraphEdge::key).collect();
        for edge in &addition.edges {
            if !edges.contains(&edge.key()) {
                merged.edges.push(edge.clone());
            }
        }
        merged
    }

    /// In-degree per node id
    #[must_use]
    pub fn in_degrees(&self) -> HashMap<&str, usize> {
        let mut degrees: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = degrees.get_mut(edge.target.as_str()) {
                *d += 1;
            }
        }
        degrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> CausalGraph {
        CausalGraph::new()
            .with_node(GraphNode::new("rain", "Rainfall", NodeKind::Driver))
            .with_node(GraphNode::new("yield", "Crop yield", NodeKind::Outcome))
            .with_edge(GraphEdge::new("rain", "yield", "increases", 0.6))
    }

    #[test]
    fn clean_graph_has_no_issues() {
        assert!(sample().integrity_issues().is_empty());
    }

    #[test]
    fn reports_duplicates_and_dangling_edges() {
        let graph = sample()
            .with_node(GraphNode::new("rain", "Again", NodeKind::Driver))
            .with_edge(GraphEdge::new("rain", "ghost", "increases", 0.1));
        let issues = graph.integrity_issues();
        assert_eq!(
            issues,
            vec![
                GraphIssue::DuplicateNode("rain".into()),
                GraphIssue::DanglingEdge {
                    source: "rain".into(),
                    target: "ghost".into()
                },
            ]
        );
    }

    #[test]
    fn merge_expansion_keeps_existing_and_adds_new() {
        let base = sample();
        let addition = CausalGraph::new()
            .with_node(GraphNode::new("rain", "Renamed", NodeKind::Mediator))
            .with_node(GraphNode::new("soil", "Soil moisture", NodeKind::Mediator))
            .with_edge(GraphEdge::new("rain", "soil", "increases", 0.8))
            .with_edge(GraphEdge::new("rain", "yield", "increases", 0.9));

        let merged = base.merge_expansion(&addition);

        assert_eq!(merged.nodes.len(), 3);
        assert_eq!(merged.node("rain").map(|n| n.label.as_str()), Some("Rainfall"));
        assert_eq!(merged.edges.len(), 2);
        assert_eq!(base.nodes.len(), 2);
    }

    #[test]
    fn snapshot_json_defaults_missing_parameters() {
        let json = r#"{"nodes":[{"id":"a","label":"A"}],"edges":[]}"#;
        let graph: CausalGraph = serde_json::from_str(json).unwrap();
        let node = graph.node("a").unwrap();
        assert_eq!(node.kind, NodeKind::Driver);
        assert!((node.max - 100.0).abs() < f64::EPSILON);
    }
}
