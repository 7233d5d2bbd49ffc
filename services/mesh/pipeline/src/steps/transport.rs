//! Hand-off to the network

use crate::container::MessageContainer;
use crate::context::{PipelineContext, PipelineStep};
use crate::error::PipelineError;
use crate::transport::Transport;
use async_trait::async_trait;
use mesh_wire::MessageTarget;
use std::sync::Arc;
use tracing::debug;

/// Index 5: sends encoded envelopes to their next hop and ends the traversal
pub struct TransportStep {
    transport: Arc<dyn Transport>,
}

impl TransportStep {
    /// Create the step
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PipelineStep for TransportStep {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn on_outbound(&self, _ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        let next_hop = match container.message().and_then(|m| m.target.as_ref()) {
            Some(MessageTarget::RoutedUnicast(route)) => route.next_hop().cloned(),
            Some(MessageTarget::Unicast(node)) => Some(node.clone()),
            None => None,
        }
        .ok_or_else(|| PipelineError::step(self.name(), "no next hop", container.describe()))?;
        let encoded = container
            .encoded()
            .cloned()
            .ok_or_else(|| PipelineError::step(self.name(), "message not encoded", container.describe()))?;

        debug!("Sending {} to {}", container.describe(), next_hop);
        self.transport
            .send(&next_hop, encoded)
            .await
            .map_err(|e| PipelineError::Unreachable {
                reason: format!("{}: {}", next_hop, e),
            })
    }
}
