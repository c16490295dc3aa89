/*
 * Infragram Orchestration - IaC to Architecture Diagram Pipeline
 *
 * Turns docker-compose manifests and Helm charts into diagrams through a
 * fixed step chain, one persisted run at a time.
 *
 * Architecture:
 * - Step Plan (parse -> enhance? -> layout -> generate)
 * - Step Executor (fail-fast chain up to a target step)
 * - Run State Machine (pending -> running -> completed | failed)
 * - Variant Discovery (one run per Helm values file)
 * - Pipeline Orchestrator (single run or variant fan-out)
 */

// Public modules
pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod parsers;
pub mod pipeline;
pub mod registry;
pub mod run;
pub mod sources;
pub mod stages;
pub mod variants;

// Re-exports
pub use config::{ConfigError, EnhancePolicy, LlmConfig, OrchestratorConfig};
pub use dag::{artifact_name, PipelinePlan, StepDescriptor};
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use executor::StepExecutor;
pub use graph::{Diagram, Edge, Graph, LayoutGraph, Node, PositionedNode};
pub use orchestrator::{
    InvocationOutcome, PipelineOrchestrator, RunMode, RunReport, RunRequest,
};
pub use parsers::{CompositeParser, ComposeParser, HelmParser, Parser};
pub use pipeline::{StepContext, StepHandler, StepInput, StepOutput};
pub use registry::{FileDescriptor, FileFormat, ProjectEntry, ProjectRegistry};
pub use run::RunStateMachine;
pub use sources::{
    Credential, CredentialProvider, EnvCredentialProvider, LocalSourceLister,
    MemorySourceLister, SourceFileLister,
};
pub use stages::{
    default_handlers, DiagramGenerator, EnhanceStage, Enhancer, ExcalidrawGenerator,
    GenerateStage, LayeredLayout, LayoutEngine, LayoutStage, OpenAiEnhancer, ParseStage,
};
pub use variants::{assign_unique_run_ids, discover_variants, Variant};
