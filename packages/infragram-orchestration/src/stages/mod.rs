// Step implementations
pub mod enhance_stage;
pub mod generate_stage;
pub mod layout_stage;
pub mod parse_stage;

// Re-exports
pub use enhance_stage::{EnhanceStage, Enhancer, OpenAiEnhancer};
pub use generate_stage::{DiagramGenerator, ExcalidrawGenerator, GenerateStage};
pub use layout_stage::{LayeredLayout, LayoutEngine, LayoutStage};
pub use parse_stage::ParseStage;

use crate::config::OrchestratorConfig;
use crate::pipeline::StepHandler;
use std::sync::Arc;

/// Default handler set: composite parser, OpenAI enhancer, layered layout,
/// Excalidraw generator
pub fn default_handlers(config: &OrchestratorConfig) -> Vec<Arc<dyn StepHandler>> {
    vec![
        Arc::new(ParseStage::default()),
        Arc::new(EnhanceStage::new(Arc::new(OpenAiEnhancer::new(
            config.llm.clone(),
        )))),
        Arc::new(LayoutStage::default()),
        Arc::new(GenerateStage::default()),
    ]
}
