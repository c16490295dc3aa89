//! Graph payloads exchanged between steps
//!
//! Orchestration only inspects counts on these; their shape is owned by the
//! parsers, layout engine and generator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{OrchestratorError, Result};

/// Architecture component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            description: None,
            group: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: None,
        }
    }
}

/// Output of `parse` and `enhance`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Add a node unless one with the same id exists; returns whether it was added
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.contains(&node.id) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Add an edge unless an identical `from -> to` edge exists
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if self
            .edges
            .iter()
            .any(|e| e.from == edge.from && e.to == edge.to)
        {
            return false;
        }
        self.edges.push(edge);
        true
    }

    /// Merge another graph into this one (first node with an id wins)
    pub fn merge(&mut self, other: Graph) {
        for node in other.nodes {
            self.add_node(node);
        }
        for edge in other.edges {
            self.add_edge(edge);
        }
    }

    /// Node ids are unique and every edge endpoint exists
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(OrchestratorError::step(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }
        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !seen.contains(end.as_str()) {
                    return Err(OrchestratorError::step(format!(
                        "edge {} -> {} references unknown node '{}'",
                        edge.from, edge.to, end
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub layer: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Output of `layout`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutGraph {
    pub nodes: Vec<PositionedNode>,
    pub edges: Vec<Edge>,
    pub width: f64,
    pub height: f64,
}

impl LayoutGraph {
    pub fn node(&self, id: &str) -> Option<&PositionedNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Output of `generate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagram {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub source: String,
    pub elements: Vec<serde_json::Value>,
    #[serde(default)]
    pub app_state: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> Graph {
        Graph {
            nodes: vec![Node::new("web", "web", "service"), Node::new("db", "db", "database")],
            edges: vec![Edge::new("web", "db")],
        }
    }

    #[test]
    fn test_node_type_field_name() {
        let json = serde_json::to_value(Node::new("db", "db", "database")).unwrap();
        assert_eq!(json["type"], "database");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn test_validate_accepts_consistent_graph() {
        assert!(graph().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dangling_edge() {
        let mut g = graph();
        g.edges.push(Edge::new("web", "cache"));
        let err = g.validate().unwrap_err();
        assert!(err.to_string().contains("unknown node 'cache'"));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut g = graph();
        g.nodes.push(Node::new("db", "db-2", "database"));
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_merge_keeps_first_node_and_dedupes_edges() {
        let mut g = graph();
        let other = Graph {
            nodes: vec![Node::new("db", "renamed", "database"), Node::new("cache", "cache", "cache")],
            edges: vec![Edge::new("web", "db"), Edge::new("web", "cache")],
        };
        g.merge(other);

        assert_eq!(g.nodes.len(), 3);
        assert_eq!(g.node("db").unwrap().name, "db");
        assert_eq!(g.edges.len(), 2);
    }
}
