//! Transport seam and the in-process hub

use crate::pipeline::PipelineHandle;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use mesh_wire::NodeId;
use thiserror::Error;
use tracing::{debug, info};

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No connection to the node
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    /// Remote side refused the envelope
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Carries serialized envelopes to other nodes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `bytes` to `node`
    async fn send(&self, node: &NodeId, bytes: Bytes) -> Result<(), TransportError>;

    /// Nodes this transport can currently reach
    fn connected_nodes(&self) -> Vec<NodeId>;
}

/// Transport between pipelines living in the same process
#[derive(Default)]
pub struct LocalHub {
    handles: DashMap<NodeId, PipelineHandle>,
}

impl LocalHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a pipeline
    pub fn register(&self, handle: PipelineHandle) {
        let node = handle.local_node_id().clone();
        info!("Attached {} to local hub", node);
        self.handles.insert(node, handle);
    }

    /// Detach a pipeline
    pub fn unregister(&self, node: &NodeId) {
        if self.handles.remove(node).is_some() {
            info!("Detached {} from local hub", node);
        }
    }
}

#[async_trait]
impl Transport for LocalHub {
    async fn send(&self, node: &NodeId, bytes: Bytes) -> Result<(), TransportError> {
        // Clone out so the shard lock is not held while delivering
        let handle = self
            .handles
            .get(node)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::UnknownNode(node.clone()))?;
        debug!("Hub delivering {} bytes to {}", bytes.len(), node);
        handle.deliver(bytes).map_err(|e| TransportError::Rejected(e.to_string()))
    }

    fn connected_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.handles.iter().map(|entry| entry.key().clone()).collect();
        nodes.sort();
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::PipelineConfig;

    #[tokio::test]
    async fn test_hub_delivers_to_registered_pipelines() {
        let hub = LocalHub::new();
        let a = NodeId::new("a", "ns");
        let pipeline = Pipeline::new(PipelineConfig::default(), a.clone(), Vec::new());
        hub.register(pipeline.handle());

        assert_eq!(hub.connected_nodes(), vec![a.clone()]);
        hub.send(&a, Bytes::from_static(b"envelope")).await.unwrap();
        assert_eq!(pipeline.stats().queued, 1);

        let b = NodeId::new("b", "ns");
        assert_eq!(
            hub.send(&b, Bytes::new()).await,
            Err(TransportError::UnknownNode(b.clone()))
        );

        hub.unregister(&a);
        assert!(hub.connected_nodes().is_empty());
    }
}
