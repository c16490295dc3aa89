use crate::error::{OrchestratorError, Result};
use crate::graph::{Diagram, Graph, LayoutGraph};
use crate::registry::ProjectEntry;
use crate::sources::{Credential, SourceFileLister};
use crate::variants::Variant;
use async_trait::async_trait;
use infragram_storage::{StepMetrics, StepName};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Step context passed to handlers
#[derive(Clone)]
pub struct StepContext {
    pub project: Arc<ProjectEntry>,
    pub run_id: String,
    /// Override file bound into this run (variant runs)
    pub variant: Option<Variant>,
    /// Enhancement credential, resolved before the run starts
    pub credential: Option<Credential>,
    pub sources: Arc<dyn SourceFileLister>,
}

/// Step input: one artifact per declared dependency
///
/// When an optional dependency was skipped, the artifact stored under its
/// name is the one that stood in for it.
#[derive(Debug, Default)]
pub struct StepInput {
    artifacts: BTreeMap<StepName, serde_json::Value>,
}

impl StepInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dependency: StepName, artifact: serde_json::Value) {
        self.artifacts.insert(dependency, artifact);
    }

    pub fn with(mut self, dependency: StepName, artifact: serde_json::Value) -> Self {
        self.insert(dependency, artifact);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn get(&self, dependency: StepName) -> Option<&serde_json::Value> {
        self.artifacts.get(&dependency)
    }

    /// Decode the artifact for `dependency`
    pub fn decode<T: DeserializeOwned>(&self, dependency: StepName) -> Result<T> {
        let value = self.get(dependency).ok_or_else(|| {
            OrchestratorError::MissingDependency(format!("No input for {}", dependency))
        })?;
        T::deserialize(value).map_err(|e| {
            OrchestratorError::step(format!("Malformed {} artifact: {}", dependency, e))
        })
    }

    pub fn graph(&self, dependency: StepName) -> Result<Graph> {
        self.decode(dependency)
    }

    pub fn layout(&self, dependency: StepName) -> Result<LayoutGraph> {
        self.decode(dependency)
    }
}

/// Step output: the artifact payload plus the counts orchestration inspects
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub artifact: serde_json::Value,
    pub metrics: StepMetrics,
}

impl StepOutput {
    pub fn from_graph(graph: &Graph) -> Result<Self> {
        Ok(Self {
            artifact: serde_json::to_value(graph)?,
            metrics: StepMetrics {
                nodes: graph.nodes.len(),
                edges: graph.edges.len(),
                elements: 0,
            },
        })
    }

    pub fn from_layout(layout: &LayoutGraph) -> Result<Self> {
        Ok(Self {
            artifact: serde_json::to_value(layout)?,
            metrics: StepMetrics {
                nodes: layout.nodes.len(),
                edges: layout.edges.len(),
                elements: 0,
            },
        })
    }

    pub fn from_diagram(diagram: &Diagram) -> Result<Self> {
        Ok(Self {
            artifact: serde_json::to_value(diagram)?,
            metrics: StepMetrics {
                elements: diagram.elements.len(),
                ..Default::default()
            },
        })
    }
}

/// Step handler trait (pluggable steps)
///
/// Handlers are pure transformations of their input artifacts. Errors they
/// return, and panics they raise, end up in the step's `error` field.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Step identifier
    fn step(&self) -> StepName;

    /// Execute step
    async fn execute(&self, input: StepInput, ctx: &StepContext) -> Result<StepOutput>;
}
