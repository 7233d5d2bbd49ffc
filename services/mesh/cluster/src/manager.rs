//! Cluster manager: join, renewal, lazy expiry and the live-node snapshot.

use crate::{ClusterConfig, ClusterError, NodeManagement};
use async_trait::async_trait;
use dashmap::DashMap;
use mesh_storage::{compare_and_swap_loop, AtomicRef, Directory, StorageError, MAX_CAS_ATTEMPTS};
use mesh_topology::ConnectivityGraph;
use mesh_wire::{Clock, NodeCapabilities, NodeId, NodeInfo, NodeLease, NodeStatus, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable view of the live cluster taken by one tick
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// Live nodes at snapshot time
    pub nodes: BTreeMap<NodeId, NodeInfo>,
    /// Connectivity graph of those nodes
    pub graph: ConnectivityGraph,
    /// When the snapshot was taken
    pub taken_at: Option<Timestamp>,
}

impl ClusterSnapshot {
    /// Build a snapshot from live nodes
    pub fn new(nodes: Vec<NodeInfo>, taken_at: Timestamp) -> Self {
        let graph = ConnectivityGraph::from_nodes(&nodes);
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            graph,
            taken_at: Some(taken_at),
        }
    }

    /// Number of nodes in the snapshot
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Owns node membership and the local cluster view
pub struct ClusterManager {
    config: ClusterConfig,
    directory: Arc<dyn Directory<NodeId, NodeInfo>>,
    clock: Clock,
    /// Recently read node records
    cache: DashMap<NodeId, NodeInfo>,
    snapshot: AtomicRef<ClusterSnapshot>,
}

impl ClusterManager {
    /// Create a manager over the node directory
    pub fn new(config: ClusterConfig, directory: Arc<dyn Directory<NodeId, NodeInfo>>, clock: Clock) -> Self {
        Self {
            config,
            directory,
            clock,
            cache: DashMap::new(),
            snapshot: AtomicRef::new(ClusterSnapshot::default()),
        }
    }

    /// Lease configuration
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Clock used for lease arithmetic
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Join `namespace` under a freshly generated node id
    pub async fn join_cluster(
        &self,
        namespace: &str,
        capabilities: NodeCapabilities,
        url: Option<String>,
    ) -> Result<NodeInfo, ClusterError> {
        for attempt in 1..=self.config.join_attempts {
            let lease = NodeLease::issue(&self.clock, self.config.lease_duration, self.config.renew_interval);
            let info = NodeInfo::new(NodeId::generate(namespace), capabilities.clone(), lease, url.clone());

            if self.directory.compare_and_set(&info.id, None, info.clone()).await? {
                info!(
                    "Node {} joined cluster (capabilities: {:?})",
                    info.id, info.capabilities.addressable_types
                );
                self.cache.insert(info.id.clone(), info.clone());
                return Ok(info);
            }

            warn!("Node id {} already taken (attempt {}), regenerating", info.id, attempt);
        }

        Err(ClusterError::JoinExhausted {
            attempts: self.config.join_attempts,
        })
    }

    /// Renew the lease of `node_id`, replacing its capabilities
    pub async fn renew_lease(
        &self,
        node_id: &NodeId,
        challenge_token: &str,
        capabilities: NodeCapabilities,
    ) -> Result<NodeInfo, ClusterError> {
        let renewed = self
            .modify_live(node_id, Some(challenge_token), |current| {
                let mut next = current.clone();
                next.lease = current
                    .lease
                    .renewed(&self.clock, self.config.lease_duration, self.config.renew_interval);
                next.capabilities = capabilities.clone();
                next
            })
            .await?;

        debug!("Renewed lease for {} until {}", node_id, renewed.lease.expires_at);
        Ok(renewed)
    }

    /// Apply `update` to a live node record
    pub async fn update_node<F>(&self, node_id: &NodeId, update: F) -> Result<NodeInfo, ClusterError>
    where
        F: FnMut(&NodeInfo) -> NodeInfo + Send,
    {
        self.modify_live(node_id, None, update).await
    }

    /// Stop new placements on `node_id`
    pub async fn drain(&self, node_id: &NodeId, challenge_token: &str) -> Result<NodeInfo, ClusterError> {
        let info = self
            .modify_live(node_id, Some(challenge_token), |current| {
                let mut next = current.clone();
                next.status = NodeStatus::Draining;
                next
            })
            .await?;
        info!("Node {} is draining", node_id);
        Ok(info)
    }

    /// Remove `node_id` from the directory
    pub async fn leave_cluster(&self, node_id: &NodeId, challenge_token: &str) -> Result<(), ClusterError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .directory
                .get(node_id)
                .await?
                .ok_or_else(|| ClusterError::InvalidNodeId(node_id.clone()))?;
            if current.lease.challenge_token != challenge_token {
                return Err(ClusterError::InvalidChallenge(node_id.clone()));
            }
            if self.directory.remove_if(node_id, &current).await? {
                self.cache.remove(node_id);
                info!("Node {} left cluster", node_id);
                return Ok(());
            }
        }

        Err(StorageError::Contention {
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }

    /// Look up a live node.
    ///
    /// Served from the cache unless `force_refresh` is set or the cached
    /// lease has run out. Expired records read as `None`.
    pub async fn get_node(&self, node_id: &NodeId, force_refresh: bool) -> Result<Option<NodeInfo>, ClusterError> {
        if !force_refresh {
            let cached = self.cache.get(node_id).map(|entry| entry.value().clone());
            if let Some(info) = cached.filter(|info| info.is_alive(&self.clock)) {
                return Ok(Some(info));
            }
        }

        match self.directory.get(node_id).await? {
            Some(info) if info.is_alive(&self.clock) => {
                self.cache.insert(node_id.clone(), info.clone());
                Ok(Some(info))
            }
            _ => {
                self.cache.remove(node_id);
                Ok(None)
            }
        }
    }

    /// Reload all live nodes and swap in a new snapshot
    pub async fn tick(&self) -> Result<Arc<ClusterSnapshot>, ClusterError> {
        let nodes: Vec<NodeInfo> = self
            .directory
            .entries()
            .await?
            .into_iter()
            .map(|(_, info)| info)
            .filter(|info| info.is_alive(&self.clock))
            .collect();

        self.cache.clear();
        for info in &nodes {
            self.cache.insert(info.id.clone(), info.clone());
        }

        let previous = self.snapshot.load().len();
        let snapshot = ClusterSnapshot::new(nodes, self.clock.now());
        if snapshot.len() != previous {
            info!("Cluster view changed: {} -> {} live nodes", previous, snapshot.len());
        }
        self.snapshot.store(snapshot);
        Ok(self.snapshot.load())
    }

    /// Remove expired node records, returns how many were removed
    pub async fn cull(&self) -> Result<usize, ClusterError> {
        let mut removed = 0;
        for (id, info) in self.directory.entries().await? {
            if info.is_alive(&self.clock) {
                continue;
            }
            // Loses to a concurrent renewal
            if self.directory.remove_if(&id, &info).await? {
                self.cache.remove(&id);
                info!("Culled expired node {}", id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.snapshot.load()
    }

    /// Nodes of the latest snapshot whose lease is still valid
    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        self.snapshot
            .load()
            .nodes
            .values()
            .filter(|info| info.is_alive(&self.clock))
            .cloned()
            .collect()
    }

    async fn modify_live<F>(
        &self,
        node_id: &NodeId,
        challenge_token: Option<&str>,
        mut update: F,
    ) -> Result<NodeInfo, ClusterError>
    where
        F: FnMut(&NodeInfo) -> NodeInfo + Send,
    {
        let stored = compare_and_swap_loop(self.directory.as_ref(), node_id, |current: Option<&NodeInfo>| {
            let current = match current {
                Some(info) if info.is_alive(&self.clock) => info,
                _ => return Err(ClusterError::InvalidNodeId(node_id.clone())),
            };
            if let Some(token) = challenge_token {
                if current.lease.challenge_token != token {
                    return Err(ClusterError::InvalidChallenge(node_id.clone()));
                }
            }
            Ok(Some(update(current)))
        })
        .await?;

        let info = stored.ok_or_else(|| ClusterError::InvalidNodeId(node_id.clone()))?;
        self.cache.insert(node_id.clone(), info.clone());
        Ok(info)
    }
}

#[async_trait]
impl NodeManagement for ClusterManager {
    async fn join_cluster(
        &self,
        namespace: &str,
        capabilities: NodeCapabilities,
        url: Option<String>,
    ) -> Result<NodeInfo, ClusterError> {
        ClusterManager::join_cluster(self, namespace, capabilities, url).await
    }

    async fn renew_lease(
        &self,
        node_id: &NodeId,
        challenge_token: &str,
        capabilities: NodeCapabilities,
    ) -> Result<NodeInfo, ClusterError> {
        ClusterManager::renew_lease(self, node_id, challenge_token, capabilities).await
    }

    async fn leave_cluster(&self, node_id: &NodeId, challenge_token: &str) -> Result<(), ClusterError> {
        ClusterManager::leave_cluster(self, node_id, challenge_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_storage::MemoryDirectory;
    use std::time::Duration;

    fn manager() -> (ClusterManager, Arc<MemoryDirectory<NodeId, NodeInfo>>, Clock) {
        let directory = Arc::new(MemoryDirectory::new());
        let clock = Clock::new();
        let manager = ClusterManager::new(ClusterConfig::default(), directory.clone(), clock.clone());
        (manager, directory, clock)
    }

    fn caps() -> NodeCapabilities {
        NodeCapabilities::new(["Greeter"])
    }

    #[tokio::test]
    async fn test_join_then_renew() {
        let (manager, _, clock) = manager();
        let joined = manager.join_cluster("ns", caps(), None).await.unwrap();

        let expected = clock.after(Duration::from_secs(10));
        assert!((expected - joined.lease.expires_at).num_milliseconds().abs() < 1000);
        assert!(joined.lease.renew_at <= joined.lease.expires_at);

        clock.advance(Duration::from_secs(5));
        let renewed = manager
            .renew_lease(&joined.id, &joined.lease.challenge_token, caps())
            .await
            .unwrap();
        assert!(renewed.lease.expires_at > joined.lease.expires_at);
        assert!(renewed.lease.renew_at > joined.lease.renew_at);
        assert_eq!(renewed.lease.challenge_token, joined.lease.challenge_token);
    }

    #[tokio::test]
    async fn test_renewals_are_monotonic() {
        let (manager, _, _) = manager();
        let joined = manager.join_cluster("ns", caps(), None).await.unwrap();

        let mut last = joined.lease.clone();
        for _ in 0..5 {
            let next = manager
                .renew_lease(&joined.id, &joined.lease.challenge_token, caps())
                .await
                .unwrap();
            assert!(next.lease.expires_at > last.expires_at);
            assert!(next.lease.renew_at > last.renew_at);
            last = next.lease;
        }
    }

    #[tokio::test]
    async fn test_wrong_challenge_never_writes() {
        let (manager, directory, _) = manager();
        let joined = manager.join_cluster("ns", caps(), None).await.unwrap();

        let result = manager.renew_lease(&joined.id, "not-the-token", caps()).await;
        assert!(matches!(result, Err(ClusterError::InvalidChallenge(_))));
        assert_eq!(directory.get(&joined.id).await.unwrap(), Some(joined));
    }

    #[tokio::test]
    async fn test_renew_unknown_or_expired() {
        let (manager, _, clock) = manager();
        let ghost = NodeId::new("ghost", "ns");
        assert!(matches!(
            manager.renew_lease(&ghost, "t", caps()).await,
            Err(ClusterError::InvalidNodeId(_))
        ));

        let joined = manager.join_cluster("ns", caps(), None).await.unwrap();
        clock.advance(Duration::from_secs(11));
        assert!(matches!(
            manager
                .renew_lease(&joined.id, &joined.lease.challenge_token, caps())
                .await,
            Err(ClusterError::InvalidNodeId(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_renewals_converge() {
        let (manager, directory, _) = manager();
        let manager = Arc::new(manager);
        let joined = manager.join_cluster("ns", caps(), None).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                let joined = joined.clone();
                tokio::spawn(async move {
                    let caps = NodeCapabilities::new([format!("Type{}", i)]);
                    manager
                        .renew_lease(&joined.id, &joined.lease.challenge_token, caps)
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for result in futures::future::join_all(tasks).await {
            results.push(result.unwrap().unwrap());
        }

        let stored = directory.get(&joined.id).await.unwrap().unwrap();
        assert!(results.contains(&stored));
        assert!(stored.lease.expires_at > joined.lease.expires_at);
    }

    #[tokio::test]
    async fn test_get_node_lazy_expiry() {
        let (manager, _, clock) = manager();
        let joined = manager.join_cluster("ns", caps(), None).await.unwrap();

        assert_eq!(manager.get_node(&joined.id, false).await.unwrap(), Some(joined.clone()));
        assert_eq!(manager.get_node(&joined.id, true).await.unwrap(), Some(joined.clone()));

        clock.advance(Duration::from_secs(11));
        assert_eq!(manager.get_node(&joined.id, false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tick_builds_graph_and_cull_removes_expired() {
        let (manager, directory, clock) = manager();
        let a = manager.join_cluster("ns", caps(), None).await.unwrap();
        let b = manager.join_cluster("ns", caps(), None).await.unwrap();

        let b_id = b.id.clone();
        manager
            .update_node(&a.id, |info| {
                let mut next = info.clone();
                next.visible_nodes.insert(b_id.clone());
                next
            })
            .await
            .unwrap();

        let snapshot = manager.tick().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.graph.has_edge(&a.id, &b.id));
        assert!(!snapshot.graph.has_edge(&b.id, &a.id));

        // Only a keeps renewing
        clock.advance(Duration::from_secs(8));
        manager
            .renew_lease(&a.id, &a.lease.challenge_token, caps())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(3));

        // The old snapshot holds pre-renewal leases for both
        assert!(manager.all_nodes().is_empty());
        assert_eq!(manager.cull().await.unwrap(), 1);
        assert_eq!(directory.len(), 1);

        let snapshot = manager.tick().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.nodes.contains_key(&a.id));
        assert_eq!(manager.all_nodes().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_and_leave() {
        let (manager, directory, _) = manager();
        let joined = manager.join_cluster("ns", caps(), None).await.unwrap();
        let token = joined.lease.challenge_token.clone();

        let drained = manager.drain(&joined.id, &token).await.unwrap();
        assert_eq!(drained.status, NodeStatus::Draining);
        assert!(!drained.accepts("Greeter"));

        assert!(matches!(
            manager.leave_cluster(&joined.id, "wrong").await,
            Err(ClusterError::InvalidChallenge(_))
        ));
        manager.leave_cluster(&joined.id, &token).await.unwrap();
        assert!(directory.is_empty());
        assert_eq!(manager.get_node(&joined.id, false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_node_management_contract() {
        let (manager, directory, clock) = manager();
        let service: Arc<dyn NodeManagement> = Arc::new(manager);

        let joined = service
            .join_cluster("ns", caps(), Some("mem://a".to_string()))
            .await
            .unwrap();
        assert_eq!(joined.url.as_deref(), Some("mem://a"));

        clock.advance(Duration::from_secs(1));
        let renewed = service
            .renew_lease(&joined.id, &joined.lease.challenge_token, caps())
            .await
            .unwrap();
        assert!(renewed.lease.expires_at > joined.lease.expires_at);

        service
            .leave_cluster(&joined.id, &joined.lease.challenge_token)
            .await
            .unwrap();
        assert!(directory.is_empty());
    }

    /// Directory where every id is already taken
    struct FullDirectory;

    #[async_trait]
    impl Directory<NodeId, NodeInfo> for FullDirectory {
        async fn get(&self, _key: &NodeId) -> Result<Option<NodeInfo>, StorageError> {
            Ok(None)
        }

        async fn compare_and_set(
            &self,
            _key: &NodeId,
            _expected: Option<&NodeInfo>,
            _new: NodeInfo,
        ) -> Result<bool, StorageError> {
            Ok(false)
        }

        async fn remove(&self, _key: &NodeId) -> Result<bool, StorageError> {
            Ok(false)
        }

        async fn remove_if(&self, _key: &NodeId, _expected: &NodeInfo) -> Result<bool, StorageError> {
            Ok(false)
        }

        async fn entries(&self) -> Result<Vec<(NodeId, NodeInfo)>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_join_gives_up() {
        let config = ClusterConfig {
            join_attempts: 3,
            ..ClusterConfig::default()
        };
        let manager = ClusterManager::new(config, Arc::new(FullDirectory), Clock::new());
        assert!(matches!(
            manager.join_cluster("ns", caps(), None).await,
            Err(ClusterError::JoinExhausted { attempts: 3 })
        ));
    }
}
