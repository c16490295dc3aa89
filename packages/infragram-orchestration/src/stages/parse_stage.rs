use crate::error::Result;
use crate::parsers::{CompositeParser, Parser};
use crate::pipeline::{StepContext, StepHandler, StepInput, StepOutput};
use async_trait::async_trait;
use infragram_storage::StepName;
use std::sync::Arc;
use tracing::info;

/// Parse step: project sources → `parsed-graph.json`
pub struct ParseStage {
    parser: Arc<dyn Parser>,
}

impl ParseStage {
    pub fn new(parser: Arc<dyn Parser>) -> Self {
        Self { parser }
    }
}

impl Default for ParseStage {
    fn default() -> Self {
        Self::new(Arc::new(CompositeParser::new()))
    }
}

#[async_trait]
impl StepHandler for ParseStage {
    fn step(&self) -> StepName {
        StepName::Parse
    }

    async fn execute(&self, _input: StepInput, ctx: &StepContext) -> Result<StepOutput> {
        let graph = self.parser.parse(ctx).await?;
        info!(
            "ParseStage: {} components, {} connections in project {}",
            graph.nodes.len(),
            graph.edges.len(),
            ctx.project.id
        );
        StepOutput::from_graph(&graph)
    }
}
