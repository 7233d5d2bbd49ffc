//! Addressable placement for mesh.
//!
//! Every addressable lives on exactly one node at a time. The binding is an
//! [`AddressableLease`] stored in the addressable directory; the first caller
//! to reference an addressable picks a host through a [`PlacementStrategy`]
//! and records the choice with compare-and-set. Later callers find the lease
//! and reuse it until it expires or its host dies.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod strategy;

use async_trait::async_trait;
use mesh_cluster::ClusterError;
use mesh_storage::StorageError;
use mesh_wire::{AddressableLease, AddressableReference, NodeId};
use std::time::Duration;
use thiserror::Error;

pub use manager::AddressableManager;
pub use strategy::{PlacementStrategy, PlacementStrategyKind, PreferLocalPlacement, RandomPlacement};

/// Placement errors
#[derive(Error, Debug)]
pub enum PlacementError {
    /// No live node in the namespace can host the addressable
    #[error("No available node for {0}")]
    NoAvailableNode(AddressableReference),
    /// Caller does not hold the lease it tried to change
    #[error("Node {node_id} does not hold the lease for {reference}")]
    NotLeaseHolder {
        /// Addressable
        reference: AddressableReference,
        /// Node that asked
        node_id: NodeId,
    },
    /// Cluster lookup failure
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
    /// Directory failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Addressable lease timing and placement retry policy
#[derive(Debug, Clone)]
pub struct AddressableConfig {
    /// Time an addressable stays bound to its host without renewal
    pub lease_duration: Duration,
    /// Time after which the host should renew
    pub renew_interval: Duration,
    /// Placement rounds before reporting no available node
    pub placement_attempts: usize,
    /// Delay before the second round
    pub backoff_base: Duration,
    /// Largest delay between rounds
    pub backoff_cap: Duration,
}

impl Default for AddressableConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(600),
            renew_interval: Duration::from_secs(300),
            placement_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(2),
        }
    }
}

/// Addressable management contract served to remote nodes
#[async_trait]
pub trait AddressableManagement: Send + Sync {
    /// Extend the lease `node_id` holds on `reference`
    async fn renew_addressable_lease(
        &self,
        reference: &AddressableReference,
        node_id: &NodeId,
    ) -> Result<Option<AddressableLease>, PlacementError>;

    /// Give up the lease `node_id` holds on `reference`
    async fn abandon_addressable_lease(
        &self,
        reference: &AddressableReference,
        node_id: &NodeId,
    ) -> Result<bool, PlacementError>;
}
