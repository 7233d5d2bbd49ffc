//! Mesh router backed by the cluster connectivity graph

use crate::router::{DropReason, Router, RouterConfig, RouterStats, RoutingDecision, RoutingError};
use async_trait::async_trait;
use dashmap::DashMap;
use mesh_cluster::ClusterManager;
use mesh_placement::AddressableManager;
use mesh_wire::{Message, MessageTarget, NodeId, Route};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes messages from the local node across the mesh
pub struct MeshRouter {
    /// Local node ID
    local_node_id: NodeId,
    cluster: Arc<ClusterManager>,
    addressables: Arc<AddressableManager>,
    config: RouterConfig,
    decisions_counter: AtomicU64,
    forwards_counter: AtomicU64,
    local_counter: AtomicU64,
    drops_counter: AtomicU64,
    reused_counter: AtomicU64,
    drop_reasons: DashMap<DropReason, u64>,
}

impl MeshRouter {
    /// Create a router for `local_node_id`
    pub fn new(
        local_node_id: NodeId,
        cluster: Arc<ClusterManager>,
        addressables: Arc<AddressableManager>,
        config: RouterConfig,
    ) -> Self {
        Self {
            local_node_id,
            cluster,
            addressables,
            config,
            decisions_counter: AtomicU64::new(0),
            forwards_counter: AtomicU64::new(0),
            local_counter: AtomicU64::new(0),
            drops_counter: AtomicU64::new(0),
            reused_counter: AtomicU64::new(0),
            drop_reasons: DashMap::new(),
        }
    }

    /// Node the message is ultimately headed for
    async fn resolve_destination(&self, message: &Message) -> Result<Option<NodeId>, RoutingError> {
        match &message.target {
            Some(MessageTarget::Unicast(node)) => Ok(Some(node.clone())),
            Some(MessageTarget::RoutedUnicast(route)) => Ok(route.destination().cloned()),
            None => match message.destination() {
                Some(reference) => Ok(Some(
                    self.addressables
                        .place_or_locate(&self.local_node_id.namespace, reference)
                        .await?,
                )),
                None => Ok(None),
            },
        }
    }

    fn record(&self, decision: &RoutingDecision) {
        self.decisions_counter.fetch_add(1, Ordering::Relaxed);
        match decision {
            RoutingDecision::Forward(_) => {
                self.forwards_counter.fetch_add(1, Ordering::Relaxed);
            }
            RoutingDecision::Local => {
                self.local_counter.fetch_add(1, Ordering::Relaxed);
            }
            RoutingDecision::Drop(reason) => {
                self.drops_counter.fetch_add(1, Ordering::Relaxed);
                *self.drop_reasons.entry(*reason).or_insert(0) += 1;
            }
        }
    }
}

#[async_trait]
impl Router for MeshRouter {
    fn local_node_id(&self) -> &NodeId {
        &self.local_node_id
    }

    fn find_route(&self, destination: &NodeId) -> Option<Route> {
        if destination == &self.local_node_id {
            return Some(Route::new([self.local_node_id.clone()]));
        }
        let snapshot = self.cluster.snapshot();
        snapshot
            .graph
            .shortest_path(&self.local_node_id, destination, self.config.max_expansions)
            .map(Route::new)
    }

    fn verify_route(&self, route: &Route) -> bool {
        if !route.is_valid() {
            return false;
        }
        let mut path: Vec<NodeId> = Vec::with_capacity(route.len() + 1);
        if route.next_hop() != Some(&self.local_node_id) {
            path.push(self.local_node_id.clone());
        }
        path.extend(route.hops().cloned());
        if path.len() == 1 {
            return true;
        }
        self.cluster.snapshot().graph.is_path(&path)
    }

    async fn decide(&self, message: &Message, projected: Option<&Route>) -> Result<RoutingDecision, RoutingError> {
        let destination = match self.resolve_destination(message).await? {
            Some(destination) => destination,
            None => {
                let decision = RoutingDecision::Drop(DropReason::InvalidDestination);
                self.record(&decision);
                return Ok(decision);
            }
        };

        let carried = match &message.target {
            Some(MessageTarget::RoutedUnicast(route)) => Some(route),
            _ => None,
        };
        let reusable = projected
            .or(carried)
            .filter(|route| route.destination() == Some(&destination) && self.verify_route(route));

        let mut route = match reusable {
            Some(route) => {
                self.reused_counter.fetch_add(1, Ordering::Relaxed);
                route.clone()
            }
            None => match self.find_route(&destination) {
                Some(route) => route,
                None => {
                    warn!("No route from {} to {}", self.local_node_id, destination);
                    let decision = RoutingDecision::Drop(DropReason::NoRoute);
                    self.record(&decision);
                    return Ok(decision);
                }
            },
        };

        // The local hop is implicit
        if route.next_hop() == Some(&self.local_node_id) {
            route.pop();
        }

        let decision = if route.is_empty() {
            RoutingDecision::Local
        } else {
            debug!(
                "Routing {} to {} via {} hop(s)",
                message.content.kind(),
                destination,
                route.len()
            );
            RoutingDecision::Forward(route)
        };
        self.record(&decision);
        Ok(decision)
    }

    fn stats(&self) -> RouterStats {
        let mut stats = RouterStats::new(&self.local_node_id);
        stats.decisions_made = self.decisions_counter.load(Ordering::Relaxed);
        stats.messages_forwarded = self.forwards_counter.load(Ordering::Relaxed);
        stats.messages_local = self.local_counter.load(Ordering::Relaxed);
        stats.messages_dropped = self.drops_counter.load(Ordering::Relaxed);
        stats.projected_reused = self.reused_counter.load(Ordering::Relaxed);
        stats.drop_reasons = self
            .drop_reasons
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();
        stats
    }
}
