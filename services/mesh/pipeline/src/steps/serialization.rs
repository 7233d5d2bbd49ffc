//! Envelope encoding

use crate::container::MessageContainer;
use crate::context::{PipelineContext, PipelineStep};
use crate::error::PipelineError;
use async_trait::async_trait;
use mesh_wire::MessageCodec;
use std::sync::Arc;

/// Index 4: encodes outbound messages and decodes inbound bytes
pub struct SerializationStep {
    codec: Arc<dyn MessageCodec>,
}

impl SerializationStep {
    /// Create the step
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl PipelineStep for SerializationStep {
    fn name(&self) -> &'static str {
        "serialization"
    }

    async fn on_outbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        let message = container
            .message()
            .ok_or_else(|| PipelineError::step(self.name(), "message not decoded", container.describe()))?;
        let encoded = self
            .codec
            .encode(message)
            .map_err(|e| PipelineError::step(self.name(), e.to_string(), container.describe()))?;
        container.set_encoded(Some(encoded));
        ctx.next(container).await
    }

    async fn on_inbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        if container.message().is_none() {
            let encoded = container
                .encoded()
                .cloned()
                .ok_or_else(|| PipelineError::step(self.name(), "nothing to decode", container.describe()))?;
            let message = self
                .codec
                .decode(&encoded)
                .map_err(|e| PipelineError::step(self.name(), e.to_string(), container.describe()))?;
            container.set_message(message);
            container.set_encoded(None);
        }
        ctx.next(container).await
    }
}
