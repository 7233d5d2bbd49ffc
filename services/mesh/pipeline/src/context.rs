//! Traversal cursor and the pipeline step trait

use crate::container::MessageContainer;
use crate::error::PipelineError;
use crate::pipeline::PipelineHandle;
use async_trait::async_trait;
use futures::future::BoxFuture;
use mesh_wire::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// From a local caller toward the network, steps run front to back
    Outbound,
    /// From the network toward local execution, steps run back to front
    Inbound,
}

/// One stage of the pipeline.
///
/// The default handlers pass the message straight to the next step.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Step name for logs and errors
    fn name(&self) -> &'static str;

    /// Handle a message moving toward the network
    async fn on_outbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        ctx.next(container).await
    }

    /// Handle a message moving toward local execution
    async fn on_inbound(&self, ctx: &mut PipelineContext, container: &mut MessageContainer) -> Result<(), PipelineError> {
        ctx.next(container).await
    }
}

/// Position of one traversal in the step array
pub struct PipelineContext {
    steps: Arc<[Arc<dyn PipelineStep>]>,
    cursor: isize,
    direction: Direction,
    handle: PipelineHandle,
    cancel: CancellationToken,
}

impl PipelineContext {
    /// Fresh traversal positioned just outside the array on the side `direction` starts from
    pub fn new(
        steps: Arc<[Arc<dyn PipelineStep>]>,
        direction: Direction,
        handle: PipelineHandle,
        cancel: CancellationToken,
    ) -> Self {
        let cursor = match direction {
            Direction::Outbound => -1,
            Direction::Inbound => steps.len() as isize,
        };
        Self {
            steps,
            cursor,
            direction,
            handle,
            cancel,
        }
    }

    /// Traversal direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Index of the step currently running
    pub fn cursor(&self) -> isize {
        self.cursor
    }

    /// Handle of the owning pipeline
    pub fn handle(&self) -> &PipelineHandle {
        &self.handle
    }

    /// Node this pipeline runs on
    pub fn local_node_id(&self) -> &NodeId {
        self.handle.local_node_id()
    }

    /// Advance the cursor and run the step there.
    ///
    /// Moving past either end of the array is a [`PipelineError::ChainOverrun`]:
    /// some step failed to finish the traversal.
    pub fn next<'a>(&'a mut self, container: &'a mut MessageContainer) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let cursor = match self.direction {
                Direction::Outbound => self.cursor + 1,
                Direction::Inbound => self.cursor - 1,
            };
            if cursor < 0 || cursor >= self.steps.len() as isize {
                return Err(PipelineError::ChainOverrun {
                    direction: self.direction,
                    cursor,
                });
            }
            self.cursor = cursor;

            let step = self.steps[cursor as usize].clone();
            match self.direction {
                Direction::Outbound => step.on_outbound(self, container).await,
                Direction::Inbound => step.on_inbound(self, container).await,
            }
        })
    }

    /// Abandon this traversal and queue the message as a new one in `direction`.
    ///
    /// A refused message stays in `container` so the failure can still be
    /// reported to its sender.
    pub fn reinject(&self, direction: Direction, container: &mut MessageContainer) -> Result<(), PipelineError> {
        self.handle
            .reinject(direction, container.detach())
            .map_err(|(err, rejected)| {
                *container = rejected;
                err
            })
    }
}
