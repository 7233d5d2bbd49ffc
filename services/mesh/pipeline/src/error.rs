//! Pipeline error taxonomy

use crate::context::Direction;
use mesh_cluster::ClusterError;
use mesh_placement::PlacementError;
use mesh_routing::RoutingError;
use std::time::Duration;
use thiserror::Error;

/// Errors completing a message's handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Intake queue is full
    #[error("Pipeline capacity exceeded ({capacity} queued messages)")]
    CapacityExceeded {
        /// Queue capacity
        capacity: usize,
    },
    /// Node absent or its lease expired
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),
    /// Lease operation with the wrong challenge token
    #[error("Invalid challenge for node {0}")]
    InvalidChallenge(String),
    /// No live node can host the addressable
    #[error("No available node for {0}")]
    NoAvailableNode(String),
    /// No path to the destination
    #[error("Unreachable: {reason}")]
    Unreachable {
        /// Drop reason reported by the router
        reason: String,
    },
    /// Message arrived at a node that is not its next hop
    #[error("Misrouted message: {0}")]
    Misrouted(String),
    /// Traversal ran off the end of the step array
    #[error("Pipeline chain overrun ({direction:?} cursor {cursor})")]
    ChainOverrun {
        /// Traversal direction
        direction: Direction,
        /// Cursor that fell outside the array
        cursor: isize,
    },
    /// Pipeline was shut down
    #[error("Pipeline cancelled")]
    Cancelled,
    /// No response arrived in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    /// Remote side answered with an error
    #[error("Remote error: {0}")]
    Remote(String),
    /// Pipeline stopped before completing the message
    #[error("Pipeline closed")]
    Closed,
    /// Directory failure
    #[error("Directory error: {0}")]
    Directory(String),
    /// Unexpected failure inside a step
    #[error("Step {step} failed: {reason} (message: {state})")]
    Step {
        /// Step name
        step: &'static str,
        /// What went wrong
        reason: String,
        /// Message state at failure time
        state: String,
    },
}

impl PipelineError {
    /// Unexpected failure in `step` while handling a message in `state`
    pub fn step(step: &'static str, reason: impl Into<String>, state: impl Into<String>) -> Self {
        PipelineError::Step {
            step,
            reason: reason.into(),
            state: state.into(),
        }
    }

    /// Whether this is a programming error or shutdown rather than a message failure
    pub fn is_defect(&self) -> bool {
        matches!(self, PipelineError::ChainOverrun { .. } | PipelineError::Cancelled)
    }
}

impl From<ClusterError> for PipelineError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::InvalidNodeId(id) => PipelineError::InvalidNodeId(id.to_string()),
            ClusterError::InvalidChallenge(id) => PipelineError::InvalidChallenge(id.to_string()),
            other => PipelineError::Directory(other.to_string()),
        }
    }
}

impl From<PlacementError> for PipelineError {
    fn from(e: PlacementError) -> Self {
        match e {
            PlacementError::NoAvailableNode(reference) => PipelineError::NoAvailableNode(reference.to_string()),
            PlacementError::Cluster(e) => e.into(),
            other => PipelineError::Directory(other.to_string()),
        }
    }
}

impl From<RoutingError> for PipelineError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::Placement(e) => e.into(),
            RoutingError::Cluster(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::{AddressableReference, Key, NodeId};

    #[test]
    fn test_taxonomy_preserved() {
        let id = NodeId::new("a", "ns");
        assert_eq!(
            PipelineError::from(ClusterError::InvalidNodeId(id.clone())),
            PipelineError::InvalidNodeId("ns:a".to_string())
        );
        assert_eq!(
            PipelineError::from(RoutingError::Cluster(ClusterError::InvalidChallenge(id))),
            PipelineError::InvalidChallenge("ns:a".to_string())
        );

        let reference = AddressableReference::new("Greeter", Key::None);
        assert!(matches!(
            PipelineError::from(RoutingError::Placement(PlacementError::NoAvailableNode(reference))),
            PipelineError::NoAvailableNode(_)
        ));
    }

    #[test]
    fn test_defects() {
        assert!(PipelineError::Cancelled.is_defect());
        assert!(PipelineError::ChainOverrun {
            direction: Direction::Outbound,
            cursor: 6
        }
        .is_defect());
        assert!(!PipelineError::CapacityExceeded { capacity: 1 }.is_defect());
        assert!(!PipelineError::step("routing", "boom", "msg").is_defect());
    }
}
