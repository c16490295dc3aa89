use crate::error::{OrchestratorError, Result};
use crate::graph::{Diagram, Graph, LayoutGraph, PositionedNode};
use crate::pipeline::{StepContext, StepHandler, StepInput, StepOutput};
use crate::registry::ProjectEntry;
use async_trait::async_trait;
use infragram_storage::StepName;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Turns a positioned graph into diagram elements
pub trait DiagramGenerator: Send + Sync {
    fn generate(&self, project: &ProjectEntry, graph: &Graph, layout: &LayoutGraph) -> Result<Diagram>;
}

/// Excalidraw scene: a labelled rectangle per node, an arrow per edge
#[derive(Debug, Default)]
pub struct ExcalidrawGenerator;

impl ExcalidrawGenerator {
    fn colors(kind: &str) -> (&'static str, &'static str) {
        match kind {
            "database" => ("#1971c2", "#a5d8ff"),
            "cache" => ("#e03131", "#ffc9c9"),
            "queue" => ("#f08c00", "#ffec99"),
            "proxy" => ("#2f9e44", "#b2f2bb"),
            "chart" => ("#6741d9", "#d0bfff"),
            _ => ("#495057", "#e9ecef"),
        }
    }

    fn base(id: String, kind: &str, seed: usize) -> Value {
        json!({
            "id": id,
            "type": kind,
            "angle": 0,
            "strokeWidth": 2,
            "strokeStyle": "solid",
            "roughness": 1,
            "opacity": 100,
            "groupIds": [],
            "seed": seed,
            "version": 1,
            "versionNonce": seed,
            "isDeleted": false,
            "locked": false,
        })
    }

    fn node_elements(node: &PositionedNode, label: &str, seed: usize) -> [Value; 2] {
        let (stroke, background) = Self::colors(&node.kind);
        let rect_id = format!("node-{}", node.id);
        let text_id = format!("label-{}", node.id);

        let mut rect = Self::base(rect_id.clone(), "rectangle", seed);
        rect["x"] = json!(node.x);
        rect["y"] = json!(node.y);
        rect["width"] = json!(node.width);
        rect["height"] = json!(node.height);
        rect["strokeColor"] = json!(stroke);
        rect["backgroundColor"] = json!(background);
        rect["fillStyle"] = json!("solid");
        rect["roundness"] = json!({ "type": 3 });
        rect["boundElements"] = json!([{ "type": "text", "id": text_id }]);

        let mut text = Self::base(text_id, "text", seed + 1);
        text["x"] = json!(node.x + 10.0);
        text["y"] = json!(node.y + node.height / 2.0 - 20.0);
        text["width"] = json!(node.width - 20.0);
        text["height"] = json!(40.0);
        text["text"] = json!(label);
        text["fontSize"] = json!(16);
        text["fontFamily"] = json!(1);
        text["textAlign"] = json!("center");
        text["verticalAlign"] = json!("middle");
        text["containerId"] = json!(rect_id);
        text["strokeColor"] = json!("#1e1e1e");

        [rect, text]
    }

    fn arrow(from: &PositionedNode, to: &PositionedNode, label: Option<&str>, seed: usize) -> Value {
        let start_x = from.x + from.width / 2.0;
        let start_y = from.y + from.height;
        let end_x = to.x + to.width / 2.0;
        let end_y = to.y;

        let mut arrow = Self::base(format!("edge-{}-{}", from.id, to.id), "arrow", seed);
        arrow["x"] = json!(start_x);
        arrow["y"] = json!(start_y);
        arrow["width"] = json!((end_x - start_x).abs());
        arrow["height"] = json!((end_y - start_y).abs());
        arrow["points"] = json!([[0.0, 0.0], [end_x - start_x, end_y - start_y]]);
        arrow["strokeColor"] = json!("#1e1e1e");
        arrow["endArrowhead"] = json!("arrow");
        arrow["startBinding"] = json!({ "elementId": format!("node-{}", from.id), "focus": 0, "gap": 4 });
        arrow["endBinding"] = json!({ "elementId": format!("node-{}", to.id), "focus": 0, "gap": 4 });
        if let Some(label) = label {
            arrow["label"] = json!({ "text": label });
        }
        arrow
    }
}

impl DiagramGenerator for ExcalidrawGenerator {
    fn generate(&self, project: &ProjectEntry, graph: &Graph, layout: &LayoutGraph) -> Result<Diagram> {
        if layout.nodes.is_empty() {
            return Err(OrchestratorError::step("layout has no nodes to draw"));
        }

        let mut elements = Vec::with_capacity(layout.nodes.len() * 2 + layout.edges.len());
        for (i, node) in layout.nodes.iter().enumerate() {
            // Prefer the (possibly enhanced) graph's name over the layout's copy
            let name = graph.node(&node.id).map(|n| n.name.as_str()).unwrap_or(&node.name);
            let label = format!("{}\n({})", name, node.kind);
            elements.extend(Self::node_elements(node, &label, 2 * i + 1));
        }

        let seed_base = 2 * layout.nodes.len() + 1;
        for (i, edge) in layout.edges.iter().enumerate() {
            let (Some(from), Some(to)) = (layout.node(&edge.from), layout.node(&edge.to)) else {
                return Err(OrchestratorError::step(format!(
                    "edge {} -> {} references a node missing from the layout",
                    edge.from, edge.to
                )));
            };
            elements.push(Self::arrow(from, to, edge.label.as_deref(), seed_base + i));
        }

        Ok(Diagram {
            kind: "excalidraw".to_string(),
            version: 2,
            source: format!("infragram:{}", project.id),
            elements,
            app_state: json!({ "viewBackgroundColor": "#ffffff", "gridSize": null }),
        })
    }
}

/// Generate step: graph + layout → `diagram.excalidraw`
pub struct GenerateStage {
    generator: Arc<dyn DiagramGenerator>,
}

impl GenerateStage {
    pub fn new(generator: Arc<dyn DiagramGenerator>) -> Self {
        Self { generator }
    }
}

impl Default for GenerateStage {
    fn default() -> Self {
        Self::new(Arc::new(ExcalidrawGenerator))
    }
}

#[async_trait]
impl StepHandler for GenerateStage {
    fn step(&self) -> StepName {
        StepName::Generate
    }

    async fn execute(&self, input: StepInput, ctx: &StepContext) -> Result<StepOutput> {
        let layout = input.layout(StepName::Layout)?;
        let graph = input.graph(StepName::Enhance)?;
        let diagram = self.generator.generate(&ctx.project, &graph, &layout)?;
        info!(
            "GenerateStage: {} elements for project {}",
            diagram.elements.len(),
            ctx.project.id
        );
        StepOutput::from_diagram(&diagram)
    }
}
