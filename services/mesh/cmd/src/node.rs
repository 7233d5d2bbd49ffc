//! One mesh node: membership, background loops and its pipeline

use crate::config::NodeConfig;
use crate::{component_debug, component_error, component_info, component_warn};
use anyhow::Result;
use async_trait::async_trait;
use mesh_cluster::{ClusterError, ClusterManager};
use mesh_pipeline::{ExecutionDispatcher, LocalHub, Pipeline, Transport};
use mesh_placement::AddressableManager;
use mesh_routing::{MeshRouter, RouterConfig};
use mesh_storage::{open_directory, Directory};
use mesh_wire::{AddressableLease, AddressableReference, Clock, NodeCapabilities, NodeId, NodeInfo};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Pause before retrying a failed renewal
const RENEW_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Node and addressable directories shared by every node of the process
#[derive(Clone)]
pub struct Directories {
    /// Node membership records
    pub nodes: Arc<dyn Directory<NodeId, NodeInfo>>,
    /// Addressable leases
    pub addressables: Arc<dyn Directory<AddressableReference, AddressableLease>>,
}

impl Directories {
    /// Open both directories on the configured backend
    pub async fn open(config: &NodeConfig) -> Result<Self> {
        Ok(Self {
            nodes: open_directory(config.directory_mode("nodes")).await?,
            addressables: open_directory(config.directory_mode("addressables")).await?,
        })
    }
}

/// Answers every invocation with its own arguments
pub struct EchoDispatcher;

#[async_trait]
impl ExecutionDispatcher for EchoDispatcher {
    async fn dispatch(&self, reference: &AddressableReference, method: &str, arguments: &[u8]) -> Result<Vec<u8>, String> {
        component_debug!("execution", "{}.{} ({} bytes)", reference, method, arguments.len());
        Ok(arguments.to_vec())
    }
}

/// A joined node with its running loops
pub struct MeshNode {
    id: NodeId,
    challenge_token: String,
    cluster: Arc<ClusterManager>,
    router: Arc<MeshRouter>,
    pipeline: Arc<Pipeline>,
    hub: Arc<LocalHub>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MeshNode {
    /// Join the cluster, start the pipeline and the lease and tick loops
    pub async fn start(
        config: &NodeConfig,
        directories: &Directories,
        clock: Clock,
        hub: Arc<LocalHub>,
        dispatcher: Arc<dyn ExecutionDispatcher>,
    ) -> Result<Self> {
        let cluster = Arc::new(ClusterManager::new(config.cluster_config(), directories.nodes.clone(), clock));
        let capabilities = NodeCapabilities::new(config.capabilities.iter().cloned());
        let info = cluster
            .join_cluster(&config.namespace, capabilities.clone(), None)
            .await?;
        component_info!("cluster", "Joined as {} (lease until {})", info.id, info.lease.expires_at);

        let addressables = Arc::new(AddressableManager::new(
            config.addressable_config(),
            directories.addressables.clone(),
            cluster.clone(),
            config.placement_strategy.build(&info.id),
        ));
        let router = Arc::new(MeshRouter::new(
            info.id.clone(),
            cluster.clone(),
            addressables.clone(),
            RouterConfig::default(),
        ));
        let pipeline = Pipeline::builder(info.id.clone())
            .config(config.pipeline_config())
            .cluster(cluster.clone())
            .addressables(addressables)
            .router(router.clone())
            .transport(hub.clone())
            .dispatcher(dispatcher)
            .build()
            .map_err(anyhow::Error::msg)?;
        let pipeline = Arc::new(pipeline);

        hub.register(pipeline.handle());
        pipeline.start().await;
        cluster.tick().await?;

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(renew_loop(cluster.clone(), info.clone(), capabilities, cancel.clone())),
            tokio::spawn(tick_loop(
                cluster.clone(),
                hub.clone(),
                info.id.clone(),
                config.tick_interval,
                cancel.clone(),
            )),
        ];

        Ok(Self {
            id: info.id,
            challenge_token: info.lease.challenge_token,
            cluster,
            router,
            pipeline,
            hub,
            cancel,
            tasks,
        })
    }

    /// Node id
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Cluster manager of this node
    pub fn cluster(&self) -> &Arc<ClusterManager> {
        &self.cluster
    }

    /// Router of this node
    pub fn router(&self) -> &Arc<MeshRouter> {
        &self.router
    }

    /// Pipeline of this node
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Stop the loops and the pipeline, then leave the cluster
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        for task in self.tasks {
            task.await?;
        }

        self.hub.unregister(&self.id);
        self.pipeline.shutdown().await;

        match self.cluster.leave_cluster(&self.id, &self.challenge_token).await {
            Ok(()) => component_info!("cluster", "{} left the cluster", self.id),
            Err(e) => component_warn!("cluster", "{} could not leave cleanly: {}", self.id, e),
        }
        Ok(())
    }
}

/// Renew the node lease whenever it reaches `renew_at`
async fn renew_loop(cluster: Arc<ClusterManager>, mut info: NodeInfo, capabilities: NodeCapabilities, cancel: CancellationToken) {
    let mut wait = cluster.clock().until(&info.lease.renew_at);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match cluster
            .renew_lease(&info.id, &info.lease.challenge_token, capabilities.clone())
            .await
        {
            Ok(renewed) => {
                component_debug!("cluster", "Lease of {} renewed until {}", renewed.id, renewed.lease.expires_at);
                info = renewed;
                wait = cluster.clock().until(&info.lease.renew_at);
            }
            Err(e @ (ClusterError::InvalidChallenge(_) | ClusterError::InvalidNodeId(_))) => {
                component_error!("cluster", "{} lost its membership: {}", info.id, e);
                break;
            }
            Err(e) => {
                component_warn!("cluster", "Lease renewal for {} failed: {}", info.id, e);
                wait = RENEW_RETRY_DELAY;
            }
        }
    }
}

/// Cull expired nodes, publish what we can reach and refresh the cluster view
async fn tick_loop(
    cluster: Arc<ClusterManager>,
    hub: Arc<LocalHub>,
    local: NodeId,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = refresh_view(&cluster, hub.as_ref(), &local).await {
            component_warn!("cluster", "Cluster refresh on {} failed: {}", local, e);
        }
    }
}

async fn refresh_view(cluster: &ClusterManager, transport: &dyn Transport, local: &NodeId) -> Result<(), ClusterError> {
    let culled = cluster.cull().await?;
    if culled > 0 {
        component_info!("cluster", "Culled {} expired node(s)", culled);
    }

    let visible: BTreeSet<NodeId> = transport
        .connected_nodes()
        .into_iter()
        .filter(|node| node != local)
        .collect();
    let published = cluster.snapshot().nodes.get(local).map(|info| info.visible_nodes.clone());
    if published.as_ref() != Some(&visible) {
        cluster
            .update_node(local, |info| {
                let mut next = info.clone();
                next.visible_nodes = visible.clone();
                next
            })
            .await?;
        component_debug!("cluster", "{} now sees {} node(s)", local, visible.len());
    }

    cluster.tick().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::Key;

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_nodes_discover_each_other_and_leave() {
        let config = NodeConfig {
            capabilities: vec!["Echo".to_string()],
            node_renew_interval: Duration::from_millis(50),
            tick_interval: Duration::from_millis(20),
            pipeline_rails: 2,
            pipeline_buffer: 64,
            ..NodeConfig::default()
        };
        let caller_config = NodeConfig {
            capabilities: Vec::new(),
            ..config.clone()
        };
        let directories = Directories::open(&config).await.unwrap();
        let clock = Clock::new();
        let hub = Arc::new(LocalHub::new());

        let host = MeshNode::start(&config, &directories, clock.clone(), hub.clone(), Arc::new(EchoDispatcher))
            .await
            .unwrap();
        let caller = MeshNode::start(&caller_config, &directories, clock.clone(), hub.clone(), Arc::new(EchoDispatcher))
            .await
            .unwrap();
        let first_lease = host.cluster().get_node(host.id(), true).await.unwrap().unwrap().lease;

        wait_for(|| {
            [&host, &caller].iter().all(|node| {
                let graph = &node.cluster().snapshot().graph;
                graph.has_edge(host.id(), caller.id()) && graph.has_edge(caller.id(), host.id())
            })
        })
        .await;

        let reply = caller
            .pipeline()
            .invoke(AddressableReference::new("Echo", Key::Int32(1)), "echo", b"ping".to_vec())
            .await
            .unwrap();
        assert_eq!(reply, b"ping".to_vec());

        // Renewals run every 50ms
        let renewed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let lease = host.cluster().get_node(host.id(), true).await.unwrap().unwrap().lease;
                if lease.expires_at > first_lease.expires_at {
                    break lease;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(renewed.challenge_token, first_lease.challenge_token);

        let host_id = host.id().clone();
        host.shutdown().await.unwrap();
        assert!(caller.cluster().get_node(&host_id, true).await.unwrap().is_none());
        assert_eq!(hub.connected_nodes(), vec![caller.id().clone()]);
        caller.shutdown().await.unwrap();
    }
}
