//! Addressable manager: locate, place, renew and abandon addressable leases.

use crate::strategy::PlacementStrategy;
use crate::{AddressableConfig, AddressableManagement, PlacementError};
use async_trait::async_trait;
use mesh_cluster::ClusterManager;
use mesh_storage::{compare_and_swap_loop, Directory, StorageError, MAX_CAS_ATTEMPTS};
use mesh_wire::{AddressableLease, AddressableReference, Clock, NodeId, NodeInfo};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolves addressables to their hosting node
pub struct AddressableManager {
    config: AddressableConfig,
    directory: Arc<dyn Directory<AddressableReference, AddressableLease>>,
    cluster: Arc<ClusterManager>,
    strategy: Arc<dyn PlacementStrategy>,
    clock: Clock,
}

impl AddressableManager {
    /// Create a manager over the addressable directory
    pub fn new(
        config: AddressableConfig,
        directory: Arc<dyn Directory<AddressableReference, AddressableLease>>,
        cluster: Arc<ClusterManager>,
        strategy: Arc<dyn PlacementStrategy>,
    ) -> Self {
        let clock = cluster.clock().clone();
        info!("Addressable manager using {} placement", strategy.name());
        Self {
            config,
            directory,
            cluster,
            strategy,
            clock,
        }
    }

    /// Lease and retry configuration
    pub fn config(&self) -> &AddressableConfig {
        &self.config
    }

    /// Host of `reference`, placing it first if it has none.
    ///
    /// Retries with exponential backoff while no capable node is live, then
    /// fails with [`PlacementError::NoAvailableNode`].
    pub async fn place_or_locate(&self, namespace: &str, reference: &AddressableReference) -> Result<NodeId, PlacementError> {
        let mut delay = self.config.backoff_base;

        for attempt in 1..=self.config.placement_attempts {
            if let Some(node_id) = self.try_place(namespace, reference, attempt > 1).await? {
                return Ok(node_id);
            }

            if attempt < self.config.placement_attempts {
                debug!(
                    "No capable node for {} (attempt {}), retrying in {:?}",
                    reference, attempt, delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.config.backoff_cap);
            }
        }

        warn!(
            "Giving up placing {} after {} attempts",
            reference, self.config.placement_attempts
        );
        Err(PlacementError::NoAvailableNode(reference.clone()))
    }

    /// Current host of `reference` if its lease and its host are both alive
    pub async fn locate(&self, reference: &AddressableReference) -> Result<Option<NodeId>, PlacementError> {
        match self.directory.get(reference).await? {
            Some(lease) => Ok(self.live_host(&lease).await?),
            None => Ok(None),
        }
    }

    /// Current lease of `reference`, expired leases read as absent
    pub async fn get_lease(&self, reference: &AddressableReference) -> Result<Option<AddressableLease>, PlacementError> {
        Ok(self
            .directory
            .get(reference)
            .await?
            .filter(|lease| !lease.is_expired(&self.clock)))
    }

    /// Extend the lease `node_id` holds on `reference`.
    ///
    /// Returns `None` when `node_id` is not the current holder.
    pub async fn renew_lease(
        &self,
        reference: &AddressableReference,
        node_id: &NodeId,
    ) -> Result<Option<AddressableLease>, PlacementError> {
        let result = compare_and_swap_loop(self.directory.as_ref(), reference, |current: Option<&AddressableLease>| {
            match current {
                Some(lease) if &lease.node_id == node_id && !lease.is_expired(&self.clock) => Ok(Some(lease.renewed(
                    &self.clock,
                    self.config.lease_duration,
                    self.config.renew_interval,
                ))),
                _ => Err(PlacementError::NotLeaseHolder {
                    reference: reference.clone(),
                    node_id: node_id.clone(),
                }),
            }
        })
        .await;

        match result {
            Ok(lease) => {
                debug!("Renewed lease for {} on {}", reference, node_id);
                Ok(lease)
            }
            Err(PlacementError::NotLeaseHolder { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Drop the lease `node_id` holds on `reference`
    pub async fn abandon_lease(&self, reference: &AddressableReference, node_id: &NodeId) -> Result<bool, PlacementError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = match self.directory.get(reference).await? {
                Some(lease) if &lease.node_id == node_id => lease,
                _ => return Ok(false),
            };
            if self.directory.remove_if(reference, &current).await? {
                info!("Node {} abandoned {}", node_id, reference);
                return Ok(true);
            }
        }

        Err(StorageError::Contention {
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }

    /// One placement round, `None` when no candidate exists
    async fn try_place(
        &self,
        namespace: &str,
        reference: &AddressableReference,
        refresh_view: bool,
    ) -> Result<Option<NodeId>, PlacementError> {
        let existing = self.directory.get(reference).await?;
        if let Some(lease) = &existing {
            if let Some(host) = self.live_host(lease).await? {
                return Ok(Some(host));
            }
        }

        // Nodes mid-join only show up after a tick
        if refresh_view {
            self.cluster.tick().await?;
        }
        let candidates: Vec<NodeInfo> = self
            .cluster
            .all_nodes()
            .into_iter()
            .filter(|node| node.id.namespace == namespace && node.accepts(&reference.addressable_type))
            .collect();

        let mut issued = None;
        let result = compare_and_swap_loop(self.directory.as_ref(), reference, |current: Option<&AddressableLease>| {
            match current {
                // Another caller placed it since our read
                Some(lease) if Some(lease) != existing.as_ref() && !lease.is_expired(&self.clock) => Ok(None),
                _ => {
                    let chosen = self
                        .strategy
                        .choose(reference, &candidates)
                        .ok_or_else(|| PlacementError::NoAvailableNode(reference.clone()))?;
                    let lease = AddressableLease::issue(
                        chosen.id.clone(),
                        reference.clone(),
                        &self.clock,
                        self.config.lease_duration,
                        self.config.renew_interval,
                    );
                    issued = Some(lease.clone());
                    Ok(Some(lease))
                }
            }
        })
        .await;

        match result {
            Ok(Some(lease)) => {
                if issued.as_ref() == Some(&lease) {
                    info!("Placed {} on {}", reference, lease.node_id);
                }
                Ok(Some(lease.node_id))
            }
            Ok(None) | Err(PlacementError::NoAvailableNode(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn live_host(&self, lease: &AddressableLease) -> Result<Option<NodeId>, PlacementError> {
        if lease.is_expired(&self.clock) {
            return Ok(None);
        }
        Ok(self
            .cluster
            .get_node(&lease.node_id, false)
            .await?
            .map(|node| node.id))
    }
}

#[async_trait]
impl AddressableManagement for AddressableManager {
    async fn renew_addressable_lease(
        &self,
        reference: &AddressableReference,
        node_id: &NodeId,
    ) -> Result<Option<AddressableLease>, PlacementError> {
        self.renew_lease(reference, node_id).await
    }

    async fn abandon_addressable_lease(
        &self,
        reference: &AddressableReference,
        node_id: &NodeId,
    ) -> Result<bool, PlacementError> {
        self.abandon_lease(reference, node_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RandomPlacement;
    use mesh_cluster::ClusterConfig;
    use mesh_storage::MemoryDirectory;
    use mesh_wire::{Key, NodeCapabilities};
    use std::time::Duration;

    fn setup() -> (Arc<ClusterManager>, AddressableManager) {
        let cluster = Arc::new(ClusterManager::new(
            ClusterConfig::default(),
            Arc::new(MemoryDirectory::new()),
            Clock::new(),
        ));
        let manager = AddressableManager::new(
            AddressableConfig::default(),
            Arc::new(MemoryDirectory::new()),
            cluster.clone(),
            Arc::new(RandomPlacement),
        );
        (cluster, manager)
    }

    fn greeter(key: &str) -> AddressableReference {
        AddressableReference::new("Greeter", Key::String(key.to_string()))
    }

    #[tokio::test]
    async fn test_placement_is_sticky() {
        let (cluster, manager) = setup();
        for _ in 0..3 {
            cluster
                .join_cluster("ns", NodeCapabilities::new(["Greeter"]), None)
                .await
                .unwrap();
        }
        cluster.tick().await.unwrap();

        let reference = greeter("alice");
        let first = manager.place_or_locate("ns", &reference).await.unwrap();
        for _ in 0..10 {
            assert_eq!(manager.place_or_locate("ns", &reference).await.unwrap(), first);
        }
        assert_eq!(manager.locate(&reference).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_candidates_filtered() {
        let (cluster, manager) = setup();
        cluster
            .join_cluster("other", NodeCapabilities::new(["Greeter"]), None)
            .await
            .unwrap();
        cluster
            .join_cluster("ns", NodeCapabilities::new(["Counter"]), None)
            .await
            .unwrap();
        let draining = cluster
            .join_cluster("ns", NodeCapabilities::new(["Greeter"]), None)
            .await
            .unwrap();
        cluster
            .drain(&draining.id, &draining.lease.challenge_token)
            .await
            .unwrap();
        let good = cluster
            .join_cluster("ns", NodeCapabilities::new(["Greeter", "Counter"]), None)
            .await
            .unwrap();
        cluster.tick().await.unwrap();

        for i in 0..10 {
            let host = manager
                .place_or_locate("ns", &greeter(&format!("g{}", i)))
                .await
                .unwrap();
            assert_eq!(host, good.id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_available_node() {
        let (_, manager) = setup();
        let started = tokio::time::Instant::now();

        let result = manager.place_or_locate("ns", &greeter("nobody")).await;
        assert!(matches!(result, Err(PlacementError::NoAvailableNode(_))));
        // 100 + 200 + 400 + 800 ms of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_joining_during_retry() {
        let (cluster, manager) = setup();

        let joiner = cluster.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            joiner
                .join_cluster("ns", NodeCapabilities::new(["Greeter"]), None)
                .await
                .unwrap()
        });

        let host = manager.place_or_locate("ns", &greeter("late")).await.unwrap();
        let joined = join.await.unwrap();
        assert_eq!(host, joined.id);
    }

    #[tokio::test]
    async fn test_dead_host_is_replaced() {
        let (cluster, manager) = setup();
        let caps = NodeCapabilities::new(["Greeter"]);
        let a = cluster.join_cluster("ns", caps.clone(), None).await.unwrap();
        cluster.tick().await.unwrap();

        let reference = greeter("bob");
        assert_eq!(manager.place_or_locate("ns", &reference).await.unwrap(), a.id);

        cluster.leave_cluster(&a.id, &a.lease.challenge_token).await.unwrap();
        let b = cluster.join_cluster("ns", caps, None).await.unwrap();
        cluster.tick().await.unwrap();

        assert_eq!(manager.locate(&reference).await.unwrap(), None);
        assert_eq!(manager.place_or_locate("ns", &reference).await.unwrap(), b.id);
    }

    #[tokio::test]
    async fn test_renew_and_abandon() {
        let (cluster, manager) = setup();
        let a = cluster
            .join_cluster("ns", NodeCapabilities::new(["Greeter"]), None)
            .await
            .unwrap();
        cluster.tick().await.unwrap();

        let reference = greeter("carol");
        manager.place_or_locate("ns", &reference).await.unwrap();
        let original = manager.get_lease(&reference).await.unwrap().unwrap();

        let stranger = NodeId::new("stranger", "ns");
        assert_eq!(manager.renew_addressable_lease(&reference, &stranger).await.unwrap(), None);
        assert!(!manager.abandon_addressable_lease(&reference, &stranger).await.unwrap());

        cluster.clock().advance(Duration::from_secs(1));
        let renewed = manager
            .renew_addressable_lease(&reference, &a.id)
            .await
            .unwrap()
            .unwrap();
        assert!(renewed.expires_at > original.expires_at);

        assert!(manager.abandon_addressable_lease(&reference, &a.id).await.unwrap());
        assert_eq!(manager.get_lease(&reference).await.unwrap(), None);
        assert_eq!(manager.locate(&reference).await.unwrap(), None);
    }
}
