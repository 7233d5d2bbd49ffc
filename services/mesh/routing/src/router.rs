//! Router trait and routing decision types

use async_trait::async_trait;
use mesh_cluster::ClusterError;
use mesh_placement::PlacementError;
use mesh_wire::{Message, NodeId, Route};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Default cap on vertices expanded by one route search
pub const DEFAULT_MAX_EXPANSIONS: usize = 100;

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Vertices a single route search may expand
    pub max_expansions: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }
}

/// Routing errors
#[derive(Error, Debug)]
pub enum RoutingError {
    /// Destination addressable could not be placed
    #[error("Placement error: {0}")]
    Placement(#[from] PlacementError),
    /// Cluster lookup failed
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

/// Routing decision result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Forward along the remaining hops
    Forward(Route),
    /// Deliver locally (we are the destination)
    Local,
    /// No way to deliver
    Drop(DropReason),
}

/// Reason for dropping a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// No path from the local node to the destination
    NoRoute,
    /// Message carries nothing to resolve a destination from
    InvalidDestination,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoRoute => write!(f, "no route to destination"),
            DropReason::InvalidDestination => write!(f, "invalid destination"),
        }
    }
}

/// Router trait for making routing decisions
#[async_trait]
pub trait Router: Send + Sync {
    /// Get the local node ID
    fn local_node_id(&self) -> &NodeId;

    /// Fresh path `[local, .., destination]`, `None` if unreachable
    fn find_route(&self, destination: &NodeId) -> Option<Route>;

    /// Whether every hop of `route` is still an edge of the current graph
    fn verify_route(&self, route: &Route) -> bool;

    /// Decide how to deliver `message`
    async fn decide(&self, message: &Message, projected: Option<&Route>) -> Result<RoutingDecision, RoutingError>;

    /// Remaining hops for `message`, empty for local delivery, `None` if unreachable
    async fn route_message(&self, message: &Message, projected: Option<&Route>) -> Result<Option<Route>, RoutingError> {
        Ok(match self.decide(message, projected).await? {
            RoutingDecision::Forward(route) => Some(route),
            RoutingDecision::Local => Some(Route::default()),
            RoutingDecision::Drop(_) => None,
        })
    }

    /// Get routing statistics
    fn stats(&self) -> RouterStats;
}

/// Router statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    /// Local node ID
    pub local_node_id: String,
    /// Number of routing decisions made
    pub decisions_made: u64,
    /// Number of messages forwarded
    pub messages_forwarded: u64,
    /// Number of messages delivered locally
    pub messages_local: u64,
    /// Number of messages dropped
    pub messages_dropped: u64,
    /// Projected routes reused without a fresh search
    pub projected_reused: u64,
    /// Breakdown of drop reasons
    pub drop_reasons: HashMap<String, u64>,
}

impl RouterStats {
    /// Create new router statistics
    pub fn new(local_node_id: &NodeId) -> Self {
        Self {
            local_node_id: local_node_id.to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(DropReason::NoRoute.to_string(), "no route to destination");
        assert_eq!(DropReason::InvalidDestination.to_string(), "invalid destination");
    }

    #[test]
    fn test_router_stats() {
        let stats = RouterStats::new(&NodeId::new("a", "ns"));
        assert_eq!(stats.local_node_id, "ns:a");
        assert_eq!(stats.decisions_made, 0);
        assert!(stats.drop_reasons.is_empty());
    }
}
