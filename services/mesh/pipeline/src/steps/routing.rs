//! Path computation and hop consumption

use crate::container::MessageContainer;
use crate::context::{Direction, PipelineContext, PipelineStep};
use crate::error::PipelineError;
use async_trait::async_trait;
use mesh_routing::{Router, RoutingDecision};
use mesh_wire::MessageTarget;
use std::sync::Arc;
use tracing::debug;

/// Index 3: attaches routes outbound, consumes hops inbound
pub struct RoutingStep {
    router: Arc<dyn Router>,
}

/// What an inbound message does after its hop is consumed
enum Arrival {
    /// Final hop reached
    Terminal,
    /// Meant for this node already
    Local,
    /// More hops to go
    Transit,
}

impl RoutingStep {
    /// Create the step
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl PipelineStep for RoutingStep {
    fn name(&self) -> &'static str {
        "routing"
    }

    async fn on_outbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        let decision = {
            let message = container
                .message()
                .ok_or_else(|| PipelineError::step(self.name(), "message not decoded", container.describe()))?;
            self.router.decide(message, None).await?
        };

        match decision {
            RoutingDecision::Drop(reason) => Err(PipelineError::Unreachable {
                reason: format!("{} ({})", reason, container.describe()),
            }),
            RoutingDecision::Local => {
                let local = ctx.local_node_id().clone();
                container.message_mut(self.name())?.target = Some(MessageTarget::Unicast(local));
                ctx.reinject(Direction::Inbound, container)
            }
            RoutingDecision::Forward(route) => {
                container.message_mut(self.name())?.target = Some(MessageTarget::RoutedUnicast(route));
                ctx.next(container).await
            }
        }
    }

    async fn on_inbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        let local = ctx.local_node_id().clone();
        let message = container.message_mut(self.name())?;

        let arrival = match message.target.as_mut() {
            Some(MessageTarget::RoutedUnicast(route)) => {
                route
                    .consume(&local)
                    .map_err(|e| PipelineError::Misrouted(e.to_string()))?;
                if route.is_empty() {
                    Arrival::Terminal
                } else {
                    Arrival::Transit
                }
            }
            Some(MessageTarget::Unicast(node)) if *node != local => Arrival::Transit,
            _ => Arrival::Local,
        };

        match arrival {
            Arrival::Terminal => {
                message.target = Some(MessageTarget::Unicast(local));
                ctx.next(container).await
            }
            Arrival::Local => ctx.next(container).await,
            Arrival::Transit => {
                debug!("Relaying {} through {}", container.describe(), local);
                ctx.reinject(Direction::Outbound, container)
            }
        }
    }
}
