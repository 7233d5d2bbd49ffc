//! Multi-hop path through the mesh.

use crate::error::WireError;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ordered list of nodes from the current position to the destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    path: VecDeque<NodeId>,
}

impl Route {
    /// Create a route from an ordered path
    pub fn new(path: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            path: path.into_iter().collect(),
        }
    }

    /// Remove and return the next hop
    pub fn pop(&mut self) -> Option<NodeId> {
        self.path.pop_front()
    }

    /// Consume the next hop on `local`, which must be that hop
    pub fn consume(&mut self, local: &NodeId) -> Result<(), WireError> {
        match self.path.front() {
            Some(hop) if hop == local => {
                self.path.pop_front();
                Ok(())
            }
            Some(hop) => Err(WireError::HopMismatch {
                expected: hop.to_string(),
                actual: local.to_string(),
            }),
            None => Err(WireError::RouteExhausted),
        }
    }

    /// A route is valid while it still has hops
    pub fn is_valid(&self) -> bool {
        !self.path.is_empty()
    }

    /// Next hop, if any
    pub fn next_hop(&self) -> Option<&NodeId> {
        self.path.front()
    }

    /// Final hop, if any
    pub fn destination(&self) -> Option<&NodeId> {
        self.path.back()
    }

    /// Number of remaining hops
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Whether no hops remain
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Iterate over the remaining hops in order
    pub fn hops(&self) -> impl Iterator<Item = &NodeId> {
        self.path.iter()
    }
}
