//! IaC parsers
//!
//! `CompositeParser` is the default `Parser`: it picks the project's source
//! files, dispatches each to the format's parser and merges the graphs.

pub mod compose;
pub mod helm;

pub use compose::ComposeParser;
pub use helm::HelmParser;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::graph::Graph;
use crate::pipeline::StepContext;
use crate::registry::{FileDescriptor, FileFormat};
use crate::variants::{find_chart_dir, CHART_MARKER};

static COMPOSE_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(docker-)?compose\.ya?ml$").unwrap_or_else(|e| panic!("invalid regex: {e}"))
});

/// Parse a project's sources into a graph
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, ctx: &StepContext) -> Result<Graph>;
}

/// Component type from an image or service name
pub fn infer_kind(image: &str) -> &'static str {
    let name = image.to_ascii_lowercase();
    let base = name
        .rsplit('/')
        .next()
        .and_then(|s| s.split(':').next())
        .unwrap_or(&name);

    const KINDS: &[(&str, &[&str])] = &[
        ("database", &["postgres", "mysql", "mariadb", "mongo", "cassandra", "cockroach"]),
        ("cache", &["redis", "memcached", "valkey"]),
        ("queue", &["rabbitmq", "kafka", "nats", "activemq"]),
        ("proxy", &["nginx", "traefik", "haproxy", "envoy", "caddy"]),
    ];
    KINDS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| base.contains(n)))
        .map(|(kind, _)| *kind)
        .unwrap_or("service")
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Sources to parse when the registry entry lists none
///
/// The shallowest compose file wins; otherwise the shallowest chart.
pub fn default_file_selection(files: &[String]) -> Result<Vec<FileDescriptor>> {
    let compose = files
        .iter()
        .filter(|f| COMPOSE_FILE.is_match(split_path(f).1))
        .min_by(|a, b| {
            a.matches('/')
                .count()
                .cmp(&b.matches('/').count())
                .then_with(|| a.cmp(b))
        });
    if let Some(path) = compose {
        return Ok(vec![FileDescriptor {
            path: path.clone(),
            format: FileFormat::DockerCompose,
        }]);
    }

    if let Some(dir) = find_chart_dir(files) {
        let chart = files
            .iter()
            .find(|f| {
                let (d, name) = split_path(f);
                d == dir && name.eq_ignore_ascii_case(CHART_MARKER)
            })
            .cloned()
            .unwrap_or_else(|| join(dir, CHART_MARKER));
        return Ok(vec![FileDescriptor {
            path: chart,
            format: FileFormat::Helm,
        }]);
    }

    Err(OrchestratorError::step(
        "no docker-compose file or Helm chart found",
    ))
}

/// Dispatches on file format and merges the results
#[derive(Debug, Default)]
pub struct CompositeParser;

impl CompositeParser {
    pub fn new() -> Self {
        Self
    }

    async fn parse_helm(
        &self,
        ctx: &StepContext,
        listing: &[String],
        path: &str,
    ) -> Result<Graph> {
        let (dir, name) = split_path(path);
        let chart_dir = if name.eq_ignore_ascii_case(CHART_MARKER) {
            dir.to_string()
        } else {
            path.trim_end_matches('/').to_string()
        };
        let chart_file = if name.eq_ignore_ascii_case(CHART_MARKER) {
            path.to_string()
        } else {
            join(&chart_dir, CHART_MARKER)
        };

        let values_file = match &ctx.variant {
            Some(variant) => Some(variant.values_file.clone()),
            None => ["values.yaml", "values.yml"]
                .iter()
                .map(|n| join(&chart_dir, n))
                .find(|candidate| listing.contains(candidate)),
        };

        let chart = ctx.sources.read_source_file(&ctx.project, &chart_file).await?;
        let values = match &values_file {
            Some(file) => {
                debug!("Run {}: applying values file {}", ctx.run_id, file);
                Some(ctx.sources.read_source_file(&ctx.project, file).await?)
            }
            None => None,
        };
        HelmParser::parse_str(&chart, values.as_deref())
    }
}

#[async_trait]
impl Parser for CompositeParser {
    async fn parse(&self, ctx: &StepContext) -> Result<Graph> {
        let listing = ctx.sources.list_source_files(&ctx.project).await?;
        let descriptors = match &ctx.project.files {
            Some(files) if !files.is_empty() => files.clone(),
            _ => default_file_selection(&listing)?,
        };

        let mut graph = Graph::default();
        for descriptor in &descriptors {
            info!(
                "Run {}: parsing {} ({})",
                ctx.run_id,
                descriptor.path,
                descriptor.format.as_str()
            );
            let parsed = match descriptor.format {
                FileFormat::DockerCompose => {
                    let content = ctx
                        .sources
                        .read_source_file(&ctx.project, &descriptor.path)
                        .await?;
                    ComposeParser::parse_str(&content)
                }
                FileFormat::Helm => self.parse_helm(ctx, &listing, &descriptor.path).await,
            }
            .map_err(|e| {
                warn!("Run {}: failed to parse {}: {}", ctx.run_id, descriptor.path, e);
                e
            })?;
            graph.merge(parsed);
        }

        if graph.nodes.is_empty() {
            return Err(OrchestratorError::step("no components found"));
        }
        graph.validate()?;
        Ok(graph)
    }
}
