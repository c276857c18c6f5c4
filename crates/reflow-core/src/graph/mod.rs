//! Workflow graph model.
//!
//! A workflow is a directed graph of [`Node`]s connected by [`Edge`]s. Edges
//! may carry data, set the target's trigger, or both, and are gated by an
//! [`EdgeCondition`] evaluated against the source node's output. Cycles are
//! allowed; the scheduler bounds them with an iteration cap.
//!
//! Values here are immutable once built. [`Graph::new`] is the only
//! constructor and rejects dangling references.

pub mod edge;
pub mod node;

use std::collections::{BTreeMap, BTreeSet};

pub use edge::{Edge, EdgeCondition};
pub use node::{Node, NodeKind};

use crate::error::DefinitionError;

#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub id: String,
    pub description: String,
    pub nodes: BTreeMap<String, Node>,
    pub edges: Vec<Edge>,
    pub start: Vec<String>,
    pub end: Vec<String>,
}

impl Graph {
    /// Build a validated graph.
    ///
    /// Every edge endpoint and every start/end id must name a node.
    pub fn new(
        id: impl Into<String>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        start: Vec<String>,
        end: Vec<String>,
    ) -> Result<Self, DefinitionError> {
        let mut node_map = BTreeMap::new();
        for node in nodes {
            if node_map.contains_key(&node.id) {
                return Err(DefinitionError::DuplicateNode(node.id));
            }
            node_map.insert(node.id.clone(), node);
        }

        for edge in &edges {
            for endpoint in [&edge.from, &edge.to] {
                if !node_map.contains_key(endpoint) {
                    return Err(DefinitionError::DanglingEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        if start.is_empty() {
            return Err(DefinitionError::MissingField("graph.start".into()));
        }
        for (role, ids) in [("start", &start), ("end", &end)] {
            if let Some(missing) = ids.iter().find(|id| !node_map.contains_key(*id)) {
                return Err(DefinitionError::UnknownEndpoint {
                    role,
                    id: missing.clone(),
                });
            }
        }

        Ok(Self {
            id: id.into(),
            description: String::new(),
            nodes: node_map,
            edges,
            start,
            end,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Edges leaving `node_id`, in declaration order.
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Trigger edges arriving at `node_id`.
    pub fn trigger_edges_into<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.to == node_id && e.trigger)
    }

    pub fn successors(&self, node_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == node_id)
            .map(|e| e.to.as_str())
            .collect()
    }

    pub fn predecessors(&self, node_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == node_id)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Nodes with no outgoing edges, in id order.
    pub fn sink_nodes(&self) -> Vec<&str> {
        let sources: BTreeSet<&str> = self.edges.iter().map(|e| e.from.as_str()).collect();
        self.nodes
            .keys()
            .map(|id| id.as_str())
            .filter(|id| !sources.contains(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn linear() -> Graph {
        Graph::new(
            "linear",
            vec![Node::remote("a"), Node::remote("b"), Node::remote("c")],
            vec![Edge::always("a", "b"), Edge::always("b", "c")],
            ids(&["a"]),
            ids(&["c"]),
        )
        .unwrap()
    }

    #[test]
    fn test_graph_construction() {
        let graph = linear();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.successors("a"), vec!["b"]);
        assert_eq!(graph.predecessors("c"), vec!["b"]);
        assert_eq!(graph.sink_nodes(), vec!["c"]);
        assert_eq!(graph.trigger_edges_into("b").count(), 1);
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let err = Graph::new(
            "bad",
            vec![Node::remote("a")],
            vec![Edge::always("a", "ghost")],
            ids(&["a"]),
            vec![],
        )
        .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::DanglingEdge {
                from: "a".into(),
                to: "ghost".into(),
                missing: "ghost".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = Graph::new(
            "dup",
            vec![Node::remote("a"), Node::local("a")],
            vec![],
            ids(&["a"]),
            vec![],
        )
        .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateNode("a".into()));
    }

    #[test]
    fn test_unknown_start_and_end_rejected() {
        let err = Graph::new("g", vec![Node::remote("a")], vec![], ids(&["x"]), vec![]).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownEndpoint { role: "start", .. }));

        let err =
            Graph::new("g", vec![Node::remote("a")], vec![], ids(&["a"]), ids(&["z"])).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownEndpoint { role: "end", .. }));

        let err = Graph::new("g", vec![Node::remote("a")], vec![], vec![], vec![]).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingField(_)));
    }

    #[test]
    fn test_queries_outlive_id_argument() {
        let graph = linear();
        let succ = {
            let id = String::from("a");
            graph.successors(&id)
        };
        assert_eq!(succ, vec!["b"]);
    }

    #[test]
    fn test_cycle_has_no_sinks() {
        let graph = Graph::new(
            "loop",
            vec![Node::remote("a"), Node::remote("b")],
            vec![Edge::always("a", "b"), Edge::always("b", "a")],
            ids(&["a"]),
            vec![],
        )
        .unwrap();
        assert!(graph.sink_nodes().is_empty());
    }
}
