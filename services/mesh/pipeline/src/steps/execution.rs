//! Execution end of the pipeline

use crate::container::MessageContainer;
use crate::context::{PipelineContext, PipelineStep};
use crate::error::PipelineError;
use crate::tracker::ResponseTracker;
use async_trait::async_trait;
use mesh_wire::{AddressableReference, Message, MessageContent};
use std::sync::Arc;
use tracing::debug;

/// Runs invocations addressed to addressables hosted on this node
#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
    /// Invoke `method` on `reference`, returning the serialized result or a failure description
    async fn dispatch(&self, reference: &AddressableReference, method: &str, arguments: &[u8]) -> Result<Vec<u8>, String>;
}

/// Index 0: hands responses to their waiters and requests to the dispatcher
pub struct ExecutionStep {
    dispatcher: Option<Arc<dyn ExecutionDispatcher>>,
    tracker: Arc<ResponseTracker>,
}

impl ExecutionStep {
    /// Create the step
    pub fn new(dispatcher: Option<Arc<dyn ExecutionDispatcher>>, tracker: Arc<ResponseTracker>) -> Self {
        Self { dispatcher, tracker }
    }

    fn reply(&self, ctx: &PipelineContext, request: &Message, content: MessageContent) -> Result<(), PipelineError> {
        if request.message_id.is_none() || request.source.is_none() {
            debug!("Dropping {} reply, request has no return address", content.kind());
            return Ok(());
        }
        ctx.handle().write_detached(Message::reply_to(request, content))
    }
}

#[async_trait]
impl PipelineStep for ExecutionStep {
    fn name(&self) -> &'static str {
        "execution"
    }

    async fn on_inbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        let message = container
            .message()
            .ok_or_else(|| PipelineError::step(self.name(), "message not decoded", container.describe()))?;

        match &message.content {
            content if content.is_response() => {
                if !self.tracker.complete(message) {
                    debug!("Discarding unsolicited {} {:?}", content.kind(), message.message_id);
                }
                Ok(())
            }
            MessageContent::ConnectionInfoRequest => {
                let content = MessageContent::ConnectionInfoResponse {
                    node_id: ctx.local_node_id().clone(),
                };
                self.reply(ctx, message, content)
            }
            MessageContent::InvocationRequest {
                destination,
                method,
                arguments,
            } => {
                let content = match &self.dispatcher {
                    Some(dispatcher) => match dispatcher.dispatch(destination, method, arguments).await {
                        Ok(data) => MessageContent::InvocationResponse { data },
                        Err(description) => MessageContent::Error { description },
                    },
                    None => MessageContent::Error {
                        description: format!("no executor on {}", ctx.local_node_id()),
                    },
                };
                debug!("Executed {}.{} -> {}", destination, method, content.kind());
                self.reply(ctx, message, content)
            }
            _ => Ok(()),
        }
    }
}
