//! Addressable placement and lease validation

use crate::container::MessageContainer;
use crate::context::{Direction, PipelineContext, PipelineStep};
use crate::error::PipelineError;
use async_trait::async_trait;
use mesh_cluster::ClusterManager;
use mesh_placement::AddressableManager;
use mesh_wire::MessageTarget;
use std::sync::Arc;
use tracing::debug;

/// Index 2: resolves where an addressable lives.
///
/// Outbound it pins invocations to their host. Inbound it rejects messages
/// from nodes without a live lease and sends invocations for addressables
/// hosted elsewhere back out.
pub struct PlacementStep {
    cluster: Arc<ClusterManager>,
    addressables: Arc<AddressableManager>,
}

impl PlacementStep {
    /// Create the step
    pub fn new(cluster: Arc<ClusterManager>, addressables: Arc<AddressableManager>) -> Self {
        Self { cluster, addressables }
    }
}

#[async_trait]
impl PipelineStep for PlacementStep {
    fn name(&self) -> &'static str {
        "placement"
    }

    async fn on_outbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        let namespace = ctx.local_node_id().namespace.clone();
        let message = container.message_mut(self.name())?;
        if message.target.is_none() {
            if let Some(reference) = message.destination() {
                let host = self.addressables.place_or_locate(&namespace, reference).await?;
                debug!("{} is hosted on {}", reference, host);
                message.target = Some(MessageTarget::Unicast(host));
            }
        }
        ctx.next(container).await
    }

    async fn on_inbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        let local = ctx.local_node_id().clone();
        let message = container
            .message()
            .ok_or_else(|| PipelineError::step(self.name(), "message not decoded", container.describe()))?;

        if let Some(source) = message.source.as_ref().filter(|source| **source != local) {
            if self.cluster.get_node(source, false).await?.is_none() {
                return Err(PipelineError::InvalidNodeId(source.to_string()));
            }
        }

        let host = match message.destination() {
            Some(reference) => Some(self.addressables.place_or_locate(&local.namespace, reference).await?),
            None => None,
        };
        match host {
            Some(host) if host != local => {
                debug!("Addressable moved to {}, sending {} back out", host, container.describe());
                container.message_mut(self.name())?.target = Some(MessageTarget::Unicast(host));
                ctx.reinject(Direction::Outbound, container)
            }
            _ => ctx.next(container).await,
        }
    }
}
