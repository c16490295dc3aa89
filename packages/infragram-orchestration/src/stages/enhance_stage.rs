use crate::config::LlmConfig;
use crate::error::{OrchestratorError, Result};
use crate::graph::Graph;
use crate::pipeline::{StepContext, StepHandler, StepInput, StepOutput};
use crate::registry::ProjectEntry;
use crate::sources::Credential;
use async_trait::async_trait;
use infragram_storage::StepName;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Refines a parsed graph (names, descriptions, grouping, missing edges)
#[async_trait]
pub trait Enhancer: Send + Sync {
    /// Fails with a configuration error when `credential` is absent
    async fn enhance(
        &self,
        project: &ProjectEntry,
        run_id: &str,
        graph: Graph,
        credential: Option<&Credential>,
    ) -> Result<Graph>;
}

const SYSTEM_PROMPT: &str = "You improve architecture graphs extracted from infrastructure-as-code. \
Reply with a single JSON object {\"nodes\": [{\"id\", \"name\", \"type\", \"description\", \"group\"}], \
\"edges\": [{\"from\", \"to\", \"label\"}]}. Keep every node id unchanged and never invent new ids. \
Use short human-friendly names, one-sentence descriptions and logical groups.";

/// OpenAI-compatible chat-completions enhancer
pub struct OpenAiEnhancer {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiEnhancer {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_headers(credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", credential.expose());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| OrchestratorError::configuration(format!("invalid credential: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_payload(&self, project: &ProjectEntry, graph: &Graph) -> Result<Value> {
        let graph_json = serde_json::to_string(graph)?;
        Ok(json!({
            "model": self.config.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "Project: {} ({})\nGraph:\n{}",
                        project.name, project.repo, graph_json
                    ),
                },
            ],
        }))
    }

    /// First choice's message content
    fn response_content(body: &Value) -> Result<&str> {
        body.get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::step("enhancement response has no content"))
    }

    /// Apply the model's graph on top of the original
    ///
    /// Node ids must be a subset of the original ids. Nodes the model left
    /// out are kept as they were; edges to unknown ids are dropped.
    pub fn merge_response(original: &Graph, content: &str) -> Result<Graph> {
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        let proposed: Graph = serde_json::from_str(trimmed)
            .map_err(|e| OrchestratorError::step(format!("enhancement returned invalid graph: {}", e)))?;

        let known: HashSet<&str> = original.nodes.iter().map(|n| n.id.as_str()).collect();
        if let Some(unknown) = proposed.nodes.iter().find(|n| !known.contains(n.id.as_str())) {
            return Err(OrchestratorError::step(format!(
                "enhancement returned unknown node id '{}'",
                unknown.id
            )));
        }

        let mut graph = Graph::default();
        for node in proposed.nodes {
            graph.add_node(node);
        }
        for node in &original.nodes {
            graph.add_node(node.clone());
        }
        for edge in original.edges.iter().cloned().chain(proposed.edges) {
            if known.contains(edge.from.as_str()) && known.contains(edge.to.as_str()) {
                graph.add_edge(edge);
            }
        }
        Ok(graph)
    }
}

#[async_trait]
impl Enhancer for OpenAiEnhancer {
    async fn enhance(
        &self,
        project: &ProjectEntry,
        run_id: &str,
        graph: Graph,
        credential: Option<&Credential>,
    ) -> Result<Graph> {
        let credential = credential.ok_or_else(|| {
            OrchestratorError::configuration("enhancement requires an API credential")
        })?;

        let headers = Self::build_headers(credential)?;
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let payload = self.build_payload(project, &graph)?;
        debug!("Run {}: requesting enhancement from {} ({})", run_id, url, self.config.model);

        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(&payload)
            .send()
            .await
            .map_err(|e| OrchestratorError::step(format!("enhancement request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OrchestratorError::step(format!("enhancement request failed: {}", e)))?;
        if !status.is_success() {
            return Err(OrchestratorError::step(format!(
                "enhancement API returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        let body: Value = serde_json::from_str(&text)?;
        Self::merge_response(&graph, Self::response_content(&body)?)
    }
}

/// Enhance step: parsed graph → `enhanced-graph.json`
pub struct EnhanceStage {
    enhancer: Arc<dyn Enhancer>,
}

impl EnhanceStage {
    pub fn new(enhancer: Arc<dyn Enhancer>) -> Self {
        Self { enhancer }
    }
}

#[async_trait]
impl StepHandler for EnhanceStage {
    fn step(&self) -> StepName {
        StepName::Enhance
    }

    async fn execute(&self, input: StepInput, ctx: &StepContext) -> Result<StepOutput> {
        let graph = input.graph(StepName::Parse)?;
        let before = graph.nodes.len();

        let enhanced = self
            .enhancer
            .enhance(&ctx.project, &ctx.run_id, graph, ctx.credential.as_ref())
            .await?;
        enhanced.validate()?;

        info!(
            "EnhanceStage: {} components ({} before), {} connections",
            enhanced.nodes.len(),
            before,
            enhanced.edges.len()
        );
        StepOutput::from_graph(&enhanced)
    }
}
