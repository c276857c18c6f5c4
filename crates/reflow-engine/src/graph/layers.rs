use std::collections::BTreeMap;

use reflow_core::graph::Graph;

/// Group nodes into dependency layers over trigger edges.
///
/// Kahn-style: layer 0 holds nodes with no inbound trigger edge, each later
/// layer holds nodes whose trigger predecessors all sit in earlier layers.
/// Nodes blocked by a cycle are collected into one final layer. Ids within a
/// layer are sorted. Diagnostic only; the scheduler never consults it.
pub fn topological_layers(graph: &Graph) -> Vec<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> =
        graph.nodes.keys().map(|id| (id.as_str(), 0)).collect();
    for edge in graph.edges.iter().filter(|e| e.trigger) {
        if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
            *d += 1;
        }
    }

    let mut layers = Vec::new();
    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();

    while !current.is_empty() {
        for id in &current {
            in_degree.remove(id);
        }

        let mut next = Vec::new();
        for id in &current {
            for edge in graph.outgoing_edges(*id).filter(|e| e.trigger) {
                if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        next.push(edge.to.as_str());
                    }
                }
            }
        }
        next.sort_unstable();
        next.dedup();

        layers.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    if !in_degree.is_empty() {
        layers.push(in_degree.keys().map(|s| s.to_string()).collect());
    }

    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::graph::{Edge, Node};

    fn graph(nodes: &[&str], edges: Vec<Edge>) -> Graph {
        Graph::new(
            "g",
            nodes.iter().map(|id| Node::passthrough(*id)).collect(),
            edges,
            vec![nodes[0].to_string()],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_diamond() {
        let g = graph(
            &["a", "b", "c", "d"],
            vec![
                Edge::always("a", "c"),
                Edge::always("a", "b"),
                Edge::always("b", "d"),
                Edge::always("c", "d"),
            ],
        );
        assert_eq!(
            topological_layers(&g),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn test_data_only_edges_ignored() {
        let g = graph(
            &["a", "b", "c"],
            vec![Edge::always("a", "b"), Edge::data_only("b", "c")],
        );
        assert_eq!(topological_layers(&g), vec![vec!["a", "c"], vec!["b"]]);
    }

    #[test]
    fn test_cycle_forms_final_layer() {
        let g = graph(
            &["start", "x", "y", "z"],
            vec![
                Edge::always("start", "x"),
                Edge::always("x", "y"),
                Edge::always("y", "x"),
                Edge::always("y", "z"),
            ],
        );
        assert_eq!(
            topological_layers(&g),
            vec![vec!["start"], vec!["x", "y", "z"]]
        );
    }

    #[test]
    fn test_every_node_appears_once() {
        let g = graph(
            &["a", "b", "c"],
            vec![Edge::always("a", "b"), Edge::always("b", "a")],
        );
        let flat: Vec<String> = topological_layers(&g).into_iter().flatten().collect();
        assert_eq!(flat, vec!["c", "a", "b"]);
    }
}
