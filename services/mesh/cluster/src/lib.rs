//! Lease-based cluster membership for mesh.
//!
//! A node joins by inserting a fresh [`NodeInfo`] into the node directory
//! under a random id, then keeps its membership alive by renewing the lease
//! with the challenge token it was issued. Nothing evicts a node eagerly:
//! readers treat an expired lease as absent, and a periodic cull removes
//! expired entries from the directory.
//!
//! The [`ClusterManager`] also owns the local view of the cluster. Each
//! [`ClusterManager::tick`] re-reads the directory and swaps in a new
//! [`ClusterSnapshot`] holding the live nodes and their connectivity graph.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;

use async_trait::async_trait;
use mesh_storage::StorageError;
use mesh_wire::{NodeCapabilities, NodeId, NodeInfo};
use std::time::Duration;
use thiserror::Error;

pub use manager::{ClusterManager, ClusterSnapshot};

/// Cluster membership errors
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Referenced node is absent or its lease has expired
    #[error("Invalid node id: {0}")]
    InvalidNodeId(NodeId),
    /// Lease operation presented the wrong challenge token
    #[error("Invalid challenge token for node {0}")]
    InvalidChallenge(NodeId),
    /// Could not find a free node id
    #[error("Join failed after {attempts} attempts")]
    JoinExhausted {
        /// Ids tried
        attempts: usize,
    },
    /// Directory failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Node lease timing
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Time a node stays alive without renewing
    pub lease_duration: Duration,
    /// Time after which a node should renew
    pub renew_interval: Duration,
    /// Node id generation attempts before giving up on join
    pub join_attempts: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(10),
            renew_interval: Duration::from_secs(5),
            join_attempts: 16,
        }
    }
}

/// Node management contract served to remote nodes
#[async_trait]
pub trait NodeManagement: Send + Sync {
    /// Join `namespace` with the given capabilities
    async fn join_cluster(
        &self,
        namespace: &str,
        capabilities: NodeCapabilities,
        url: Option<String>,
    ) -> Result<NodeInfo, ClusterError>;

    /// Renew the lease of `node_id`
    async fn renew_lease(
        &self,
        node_id: &NodeId,
        challenge_token: &str,
        capabilities: NodeCapabilities,
    ) -> Result<NodeInfo, ClusterError>;

    /// Leave the cluster
    async fn leave_cluster(&self, node_id: &NodeId, challenge_token: &str) -> Result<(), ClusterError>;
}
