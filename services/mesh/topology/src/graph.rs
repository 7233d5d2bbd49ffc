//! Directed connectivity graph built from a membership snapshot.

mod search;

use mesh_wire::{NodeId, NodeInfo};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Immutable directed graph of the mesh
#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    /// Outbound edges per vertex
    forward: HashMap<NodeId, BTreeSet<NodeId>>,
    /// Inbound edges per vertex
    reverse: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl ConnectivityGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for `nodes`.
    ///
    /// Edges pointing at nodes outside the snapshot are dropped.
    pub fn from_nodes<'a, I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = &'a NodeInfo>,
    {
        let nodes: Vec<&NodeInfo> = nodes.into_iter().collect();
        let mut forward: HashMap<NodeId, BTreeSet<NodeId>> = nodes
            .iter()
            .map(|n| (n.id.clone(), BTreeSet::new()))
            .collect();
        let mut reverse = forward.clone();

        let mut edges = 0usize;
        for node in &nodes {
            for visible in &node.visible_nodes {
                if visible == &node.id || !reverse.contains_key(visible) {
                    continue;
                }
                if let Some(out) = forward.get_mut(&node.id) {
                    out.insert(visible.clone());
                }
                if let Some(inbound) = reverse.get_mut(visible) {
                    inbound.insert(node.id.clone());
                }
                edges += 1;
            }
        }

        debug!("Built connectivity graph: {} vertices, {} edges", forward.len(), edges);
        Self { forward, reverse }
    }

    /// Whether `node` is a vertex
    pub fn contains(&self, node: &NodeId) -> bool {
        self.forward.contains_key(node)
    }

    /// Whether `from` sees `to`
    pub fn has_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        self.forward.get(from).is_some_and(|out| out.contains(to))
    }

    /// Nodes reachable from `node` in one hop
    pub fn neighbors(&self, node: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.forward.get(node).into_iter().flatten()
    }

    /// Nodes that see `node`
    pub fn predecessors(&self, node: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.reverse.get(node).into_iter().flatten()
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.forward.len()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }

    /// Whether every adjacent pair of `path` is an edge
    pub fn is_path(&self, path: &[NodeId]) -> bool {
        !path.is_empty() && path.windows(2).all(|pair| self.has_edge(&pair[0], &pair[1]))
    }
}
