//! docker-compose → Graph
//!
//! Services become nodes; `depends_on` (list or map form) and `links`
//! become edges from the dependent service to its dependency.

use serde_yaml::Value;

use super::infer_kind;
use crate::error::{OrchestratorError, Result};
use crate::graph::{Edge, Graph, Node};

pub struct ComposeParser;

impl ComposeParser {
    pub fn parse_str(content: &str) -> Result<Graph> {
        let doc: Value = serde_yaml::from_str(content)
            .map_err(|e| OrchestratorError::step(format!("invalid syntax: {}", e)))?;

        let services = doc
            .get("services")
            .and_then(Value::as_mapping)
            .ok_or_else(|| OrchestratorError::step("compose file defines no services"))?;

        let mut graph = Graph::default();
        for (name, service) in services {
            let Some(name) = name.as_str() else {
                continue;
            };
            let image = service.get("image").and_then(Value::as_str);
            let mut node = Node::new(name, name, infer_kind(image.unwrap_or(name)));
            node.description = image.map(|i| format!("image: {}", i));
            graph.add_node(node);
        }

        for (name, service) in services {
            let Some(name) = name.as_str() else {
                continue;
            };
            for dep in Self::dependencies(service) {
                graph.add_edge(Edge::new(name, dep));
            }
        }

        Ok(graph)
    }

    fn dependencies(service: &Value) -> Vec<String> {
        let mut deps = Vec::new();
        match service.get("depends_on") {
            Some(Value::Sequence(items)) => {
                deps.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
            }
            Some(Value::Mapping(map)) => {
                deps.extend(map.keys().filter_map(Value::as_str).map(str::to_string));
            }
            _ => {}
        }
        if let Some(links) = service.get("links").and_then(Value::as_sequence) {
            // "service[:alias]"
            deps.extend(
                links
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|l| l.split(':').next())
                    .map(str::to_string),
            );
        }
        deps
    }
}
