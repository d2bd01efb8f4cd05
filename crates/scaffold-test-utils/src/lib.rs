//! Testing utilities for the scaffold workspace
//!
//! Shared test helpers, fixtures, and async polling.

#![allow(missing_docs)]

use scaffold_crdt::{CausalGraph, GraphEdge, GraphNode, NodeKind};
use std::future::Future;
use std::time::Duration;

/// Default wait used by [`eventually`]
pub const SETTLE: Duration = Duration::from_secs(3);

/// Poll `check` until it holds or `timeout` passes
///
/// Yields to the runtime between polls so spawned pumps make progress.
pub async fn eventually_within<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// [`eventually_within`] with the default [`SETTLE`] timeout
pub async fn eventually<F>(check: F) -> bool
where
    F: FnMut() -> bool,
{
    eventually_within(SETTLE, check).await
}

/// Let spawned tasks run for a short while
pub fn settle() -> impl Future<Output = ()> {
    tokio::time::sleep(Duration::from_millis(50))
}

/// Rainfall -> soil moisture -> crop yield, with irrigation as intervention
pub fn sample_graph() -> CausalGraph {
    CausalGraph::new()
        .with_node(GraphNode::new("rainfall", "Rainfall", NodeKind::Driver).with_value(60.0))
        .with_node(GraphNode::new("soil", "Soil moisture", NodeKind::Mediator))
        .with_node(GraphNode::new("yield", "Crop yield", NodeKind::Outcome))
        .with_node(GraphNode::new("irrigation", "Irrigation", NodeKind::Intervention).with_value(20.0))
        .with_edge(GraphEdge::new("rainfall", "soil", "increases", 0.8))
        .with_edge(GraphEdge::new("irrigation", "soil", "increases", 0.5))
        .with_edge(GraphEdge::new("soil", "yield", "increases", 0.7))
}
