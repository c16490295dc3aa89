use crate::error::{OrchestratorError, Result};
use crate::graph::{Graph, LayoutGraph, PositionedNode};
use crate::pipeline::{StepContext, StepHandler, StepInput, StepOutput};
use async_trait::async_trait;
use infragram_storage::StepName;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Assigns coordinates to a graph
pub trait LayoutEngine: Send + Sync {
    fn layout(&self, graph: &Graph) -> Result<LayoutGraph>;
}

/// Longest-path layering, top to bottom
///
/// Sources sit on layer 0; every other node sits one layer below its
/// deepest predecessor. Cycles are broken at the earliest declared node.
/// Positions depend only on node and edge order.
#[derive(Debug, Clone)]
pub struct LayeredLayout {
    pub node_width: f64,
    pub node_height: f64,
    pub horizontal_gap: f64,
    pub vertical_gap: f64,
    pub margin: f64,
}

impl Default for LayeredLayout {
    fn default() -> Self {
        Self {
            node_width: 180.0,
            node_height: 80.0,
            horizontal_gap: 60.0,
            vertical_gap: 100.0,
            margin: 40.0,
        }
    }
}

impl LayeredLayout {
    /// Layer index per node, in node order
    pub fn layers(graph: &Graph) -> Result<Vec<usize>> {
        let index: HashMap<&str, usize> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let n = graph.nodes.len();
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n];
        for edge in &graph.edges {
            let (Some(&from), Some(&to)) = (index.get(edge.from.as_str()), index.get(edge.to.as_str())) else {
                return Err(OrchestratorError::step(format!(
                    "edge {} -> {} references an unknown node",
                    edge.from, edge.to
                )));
            };
            if from != to {
                preds[to].push(from);
                succs[from].push(to);
            }
        }

        let mut remaining: Vec<usize> = preds.iter().map(Vec::len).collect();
        let mut layer: Vec<Option<usize>> = vec![None; n];
        let mut placed = 0;

        while placed < n {
            // Kahn order; when only cycles remain, force the earliest node
            let next = (0..n)
                .find(|&i| layer[i].is_none() && remaining[i] == 0)
                .or_else(|| (0..n).find(|&i| layer[i].is_none()));
            let Some(i) = next else { break };

            let depth = preds[i]
                .iter()
                .filter_map(|&p| layer[p])
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            layer[i] = Some(depth);
            placed += 1;
            for &s in &succs[i] {
                remaining[s] = remaining[s].saturating_sub(1);
            }
        }

        Ok(layer.into_iter().map(|l| l.unwrap_or(0)).collect())
    }
}

impl LayoutEngine for LayeredLayout {
    fn layout(&self, graph: &Graph) -> Result<LayoutGraph> {
        let layers = Self::layers(graph)?;
        let mut slots: HashMap<usize, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(graph.nodes.len());

        for (node, &layer) in graph.nodes.iter().zip(&layers) {
            let slot = slots.entry(layer).or_insert(0);
            nodes.push(PositionedNode {
                id: node.id.clone(),
                name: node.name.clone(),
                kind: node.kind.clone(),
                layer,
                x: self.margin + *slot as f64 * (self.node_width + self.horizontal_gap),
                y: self.margin + layer as f64 * (self.node_height + self.vertical_gap),
                width: self.node_width,
                height: self.node_height,
            });
            *slot += 1;
        }

        let columns = slots.values().copied().max().unwrap_or(0) as f64;
        let rows = slots.keys().map(|l| l + 1).max().unwrap_or(0) as f64;
        let span = |count: f64, size: f64, gap: f64| {
            if count == 0.0 {
                0.0
            } else {
                count * size + (count - 1.0) * gap
            }
        };

        Ok(LayoutGraph {
            nodes,
            edges: graph.edges.clone(),
            width: 2.0 * self.margin + span(columns, self.node_width, self.horizontal_gap),
            height: 2.0 * self.margin + span(rows, self.node_height, self.vertical_gap),
        })
    }
}

/// Layout step: graph → `layout-graph.json`
pub struct LayoutStage {
    engine: Arc<dyn LayoutEngine>,
}

impl LayoutStage {
    pub fn new(engine: Arc<dyn LayoutEngine>) -> Self {
        Self { engine }
    }
}

impl Default for LayoutStage {
    fn default() -> Self {
        Self::new(Arc::new(LayeredLayout::default()))
    }
}

#[async_trait]
impl StepHandler for LayoutStage {
    fn step(&self) -> StepName {
        StepName::Layout
    }

    async fn execute(&self, input: StepInput, ctx: &StepContext) -> Result<StepOutput> {
        // Enhanced graph, or the parsed graph when enhancement was skipped
        let graph = input.graph(StepName::Enhance)?;
        let layout = self.engine.layout(&graph)?;
        info!(
            "LayoutStage: {} nodes on {}x{} canvas for run {}",
            layout.nodes.len(),
            layout.width,
            layout.height,
            ctx.run_id
        );
        StepOutput::from_layout(&layout)
    }
}
