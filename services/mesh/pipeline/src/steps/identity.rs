//! Message id and source stamping

use crate::container::MessageContainer;
use crate::context::{PipelineContext, PipelineStep};
use crate::error::PipelineError;
use async_trait::async_trait;

/// Index 1: gives outbound messages an id and a source
pub struct IdentityStep;

#[async_trait]
impl PipelineStep for IdentityStep {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn on_outbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        let message = container.message_mut(self.name())?;
        if message.message_id.is_none() {
            message.message_id = Some(ctx.handle().next_message_id());
        }
        if message.source.is_none() {
            message.source = Some(ctx.local_node_id().clone());
        }
        ctx.next(container).await
    }
}
