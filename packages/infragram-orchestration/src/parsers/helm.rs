//! Helm chart → Graph
//!
//! The chart is the root node. Chart dependencies (unless disabled through
//! `<dep>.enabled: false` in the values) and top-level values blocks that
//! carry an `image` hang off it.

use serde_yaml::Value;

use super::infer_kind;
use crate::error::{OrchestratorError, Result};
use crate::graph::{Edge, Graph, Node};

pub struct HelmParser;

impl HelmParser {
    pub fn parse_str(chart_yaml: &str, values_yaml: Option<&str>) -> Result<Graph> {
        let chart: Value = serde_yaml::from_str(chart_yaml)
            .map_err(|e| OrchestratorError::step(format!("invalid syntax in Chart.yaml: {}", e)))?;
        let values: Value = match values_yaml {
            Some(content) => serde_yaml::from_str(content).map_err(|e| {
                OrchestratorError::step(format!("invalid syntax in values file: {}", e))
            })?,
            None => Value::Null,
        };

        let chart_name = chart
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| OrchestratorError::step("Chart.yaml has no name"))?;

        let mut graph = Graph::default();
        let mut root = Node::new(chart_name, chart_name, "chart");
        root.description = chart
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        graph.add_node(root);

        if let Some(deps) = chart.get("dependencies").and_then(Value::as_sequence) {
            for dep in deps {
                let Some(name) = dep.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let id = dep.get("alias").and_then(Value::as_str).unwrap_or(name);
                if Self::disabled(&values, id) {
                    continue;
                }
                let mut node = Node::new(id, id, infer_kind(name));
                node.group = Some(chart_name.to_string());
                if graph.add_node(node) {
                    graph.add_edge(Edge::new(chart_name, id));
                }
            }
        }

        if let Some(blocks) = values.as_mapping() {
            for (key, block) in blocks {
                let Some(key) = key.as_str() else {
                    continue;
                };
                let Some(image) = Self::image(block) else {
                    continue;
                };
                if Self::disabled(&values, key) {
                    continue;
                }
                let mut node = Node::new(key, key, infer_kind(&image));
                node.description = Some(format!("image: {}", image));
                node.group = Some(chart_name.to_string());
                if graph.add_node(node) {
                    graph.add_edge(Edge::new(chart_name, key));
                }
            }
        }

        Ok(graph)
    }

    fn disabled(values: &Value, key: &str) -> bool {
        values
            .get(key)
            .and_then(|block| block.get("enabled"))
            .and_then(Value::as_bool)
            == Some(false)
    }

    /// `image: repo:tag` or `image: {repository, tag}`
    fn image(block: &Value) -> Option<String> {
        let image = block.get("image")?;
        match image {
            Value::String(s) => Some(s.clone()),
            Value::Mapping(_) => {
                let repo = image.get("repository").and_then(Value::as_str)?;
                Some(match image.get("tag").and_then(Value::as_str) {
                    Some(tag) => format!("{}:{}", repo, tag),
                    None => repo.to_string(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART: &str = r#"
apiVersion: v2
name: shop
description: Online shop
dependencies:
  - name: postgresql
    repository: https://charts.bitnami.com/bitnami
  - name: redis
    repository: https://charts.bitnami.com/bitnami
"#;

    #[test]
    fn test_chart_without_values() {
        let graph = HelmParser::parse_str(CHART, None).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.node("shop").unwrap().kind, "chart");
        assert_eq!(graph.node("postgresql").unwrap().kind, "database");
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn test_values_toggle_and_image_blocks() {
        let values = r#"
redis:
  enabled: false
frontend:
  image:
    repository: ghcr.io/acme/frontend
    tag: "1.2.0"
worker:
  image: rabbitmq:3
replicaCount: 2
"#;
        let graph = HelmParser::parse_str(CHART, Some(values)).unwrap();

        assert!(graph.node("redis").is_none());
        assert_eq!(
            graph.node("frontend").unwrap().description.as_deref(),
            Some("image: ghcr.io/acme/frontend:1.2.0")
        );
        assert_eq!(graph.node("worker").unwrap().kind, "queue");
        assert!(graph.node("replicaCount").is_none());
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_chart_requires_name() {
        assert!(HelmParser::parse_str("apiVersion: v2\n", None).is_err());
    }
}
