//! Message envelope exchanged between nodes.

use crate::addressable::AddressableReference;
use crate::node::NodeId;
use crate::route::Route;
use serde::{Deserialize, Serialize};

/// Where a message is headed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageTarget {
    /// Destination node resolved, path not yet computed
    Unicast(NodeId),
    /// Path through the mesh already computed
    RoutedUnicast(Route),
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    /// Call a method on an addressable
    InvocationRequest {
        /// Addressable being invoked
        destination: AddressableReference,
        /// Method name
        method: String,
        /// Opaque serialized arguments
        arguments: Vec<u8>,
    },
    /// Successful result of an invocation
    InvocationResponse {
        /// Opaque serialized result
        data: Vec<u8>,
    },
    /// Failure of an invocation or of its delivery
    Error {
        /// Human readable failure description
        description: String,
    },
    /// Ask a node who it is
    ConnectionInfoRequest,
    /// Answer to [`MessageContent::ConnectionInfoRequest`]
    ConnectionInfoResponse {
        /// Answering node
        node_id: NodeId,
    },
}

impl MessageContent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            MessageContent::InvocationRequest { .. } => "invocation_request",
            MessageContent::InvocationResponse { .. } => "invocation_response",
            MessageContent::Error { .. } => "error",
            MessageContent::ConnectionInfoRequest => "connection_info_request",
            MessageContent::ConnectionInfoResponse { .. } => "connection_info_response",
        }
    }

    /// Whether this content answers an earlier request
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageContent::InvocationResponse { .. }
                | MessageContent::Error { .. }
                | MessageContent::ConnectionInfoResponse { .. }
        )
    }
}

/// Envelope carried through the pipeline and across the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Payload
    pub content: MessageContent,
    /// Correlation id, stamped on the outbound path
    pub message_id: Option<i64>,
    /// Originating node
    pub source: Option<NodeId>,
    /// Destination
    pub target: Option<MessageTarget>,
}

impl Message {
    /// Create an unaddressed message
    pub fn new(content: MessageContent) -> Self {
        Self {
            content,
            message_id: None,
            source: None,
            target: None,
        }
    }

    /// Invocation request for `destination`
    pub fn invocation(destination: AddressableReference, method: impl Into<String>, arguments: Vec<u8>) -> Self {
        Self::new(MessageContent::InvocationRequest {
            destination,
            method: method.into(),
            arguments,
        })
    }

    /// Reply to `request`, addressed back to its source
    pub fn reply_to(request: &Message, content: MessageContent) -> Self {
        Self {
            content,
            message_id: request.message_id,
            source: None,
            target: request.source.clone().map(MessageTarget::Unicast),
        }
    }

    /// Set the target
    pub fn with_target(mut self, target: MessageTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Addressable this message is for, if it is an invocation
    pub fn destination(&self) -> Option<&AddressableReference> {
        match &self.content {
            MessageContent::InvocationRequest { destination, .. } => Some(destination),
            _ => None,
        }
    }
}
