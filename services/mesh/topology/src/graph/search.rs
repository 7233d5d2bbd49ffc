//! Bounded breadth-first path search.

use super::ConnectivityGraph;
use mesh_wire::NodeId;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

impl ConnectivityGraph {
    /// Shortest path `[source, .., destination]`, or `None` if unreachable.
    ///
    /// The search starts at `destination` and walks inbound edges, recording
    /// for every visited vertex the vertex it was reached from. Reaching
    /// `source` yields the path back through those parent pointers. At most
    /// `max_expansions` vertices are expanded.
    pub fn shortest_path(&self, source: &NodeId, destination: &NodeId, max_expansions: usize) -> Option<Vec<NodeId>> {
        if source == destination {
            return self.contains(source).then(|| vec![source.clone()]);
        }
        if !self.contains(source) || !self.contains(destination) {
            return None;
        }

        // parent[v] is the next hop from v toward destination
        let mut parent: HashMap<&NodeId, &NodeId> = HashMap::new();
        let mut visited: HashSet<&NodeId> = HashSet::from([destination]);
        let mut queue: VecDeque<&NodeId> = VecDeque::from([destination]);
        let mut expansions = 0usize;

        while let Some(current) = queue.pop_front() {
            if expansions >= max_expansions {
                debug!(
                    "Path search {} -> {} stopped after {} expansions",
                    source, destination, expansions
                );
                return None;
            }
            expansions += 1;

            for pred in self.predecessors(current) {
                if !visited.insert(pred) {
                    continue;
                }
                parent.insert(pred, current);
                if pred == source {
                    return Some(Self::unwind(source, &parent));
                }
                queue.push_back(pred);
            }
        }

        None
    }

    fn unwind<'a>(source: &'a NodeId, parent: &HashMap<&'a NodeId, &'a NodeId>) -> Vec<NodeId> {
        let mut path = vec![source.clone()];
        let mut cursor = source;
        while let Some(&next) = parent.get(cursor) {
            path.push(next.clone());
            cursor = next;
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{info, node};
    use super::*;

    #[test]
    fn test_direct_and_multi_hop() {
        let nodes = vec![
            info("a", &["b"]),
            info("b", &["c"]),
            info("c", &["d"]),
            info("d", &[]),
        ];
        let graph = ConnectivityGraph::from_nodes(&nodes);

        let path = graph.shortest_path(&node("a"), &node("b"), 100).unwrap();
        assert_eq!(path, vec![node("a"), node("b")]);

        let path = graph.shortest_path(&node("a"), &node("d"), 100).unwrap();
        assert_eq!(path, vec![node("a"), node("b"), node("c"), node("d")]);
        assert!(graph.is_path(&path));
    }

    #[test]
    fn test_prefers_shortest() {
        let nodes = vec![
            info("a", &["b", "x"]),
            info("b", &["c"]),
            info("c", &["d"]),
            info("x", &["d"]),
            info("d", &[]),
        ];
        let graph = ConnectivityGraph::from_nodes(&nodes);
        let path = graph.shortest_path(&node("a"), &node("d"), 100).unwrap();
        assert_eq!(path, vec![node("a"), node("x"), node("d")]);
    }

    #[test]
    fn test_unreachable() {
        // d sees a but nobody reaches d
        let nodes = vec![info("a", &["b"]), info("b", &[]), info("d", &["a"])];
        let graph = ConnectivityGraph::from_nodes(&nodes);

        assert_eq!(graph.shortest_path(&node("a"), &node("d"), 100), None);
        assert_eq!(graph.shortest_path(&node("a"), &node("ghost"), 100), None);
    }

    #[test]
    fn test_same_node() {
        let nodes = vec![info("a", &[])];
        let graph = ConnectivityGraph::from_nodes(&nodes);
        assert_eq!(graph.shortest_path(&node("a"), &node("a"), 100), Some(vec![node("a")]));
    }

    #[test]
    fn test_expansion_cap() {
        // Chain a -> n0 -> n1 -> ... -> n9
        let keys: Vec<String> = (0..10).map(|i| format!("n{}", i)).collect();
        let mut nodes = vec![info("a", &["n0"])];
        for (i, key) in keys.iter().enumerate() {
            let next: Vec<&str> = keys.get(i + 1).map(|k| vec![k.as_str()]).unwrap_or_default();
            nodes.push(info(key, &next));
        }
        let graph = ConnectivityGraph::from_nodes(&nodes);

        assert!(graph.shortest_path(&node("a"), &node("n9"), 100).is_some());
        assert_eq!(graph.shortest_path(&node("a"), &node("n9"), 3), None);
    }
}
