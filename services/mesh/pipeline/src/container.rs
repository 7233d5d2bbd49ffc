//! Message container and completion handle

use crate::error::PipelineError;
use bytes::Bytes;
use mesh_wire::Message;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type CompletionSender = oneshot::Sender<Result<(), PipelineError>>;

/// Resolves once the message's traversal finishes.
///
/// Re-injected messages carry their completion into the new traversal, so a
/// caller is completed by whichever traversal ends up terminal.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<(), PipelineError>>,
}

impl Future for Completion {
    type Output = Result<(), PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(PipelineError::Closed)))
    }
}

/// A message in flight plus the handle completing its sender
#[derive(Debug, Default)]
pub struct MessageContainer {
    message: Option<Message>,
    encoded: Option<Bytes>,
    completion: Option<CompletionSender>,
}

impl MessageContainer {
    /// Container for a decoded message with a completion handle
    pub fn for_message(message: Message) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let container = Self {
            message: Some(message),
            encoded: None,
            completion: Some(tx),
        };
        (container, Completion { rx })
    }

    /// Container for a decoded message nobody waits on
    pub fn detached(message: Message) -> Self {
        Self {
            message: Some(message),
            ..Self::default()
        }
    }

    /// Container for bytes received from the network
    pub fn from_wire(encoded: Bytes) -> Self {
        Self {
            encoded: Some(encoded),
            ..Self::default()
        }
    }

    /// Decoded message, if any
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    /// Decoded message, failing `step` if there is none
    pub fn message_mut(&mut self, step: &'static str) -> Result<&mut Message, PipelineError> {
        if self.message.is_none() {
            return Err(PipelineError::step(step, "message not decoded", self.describe()));
        }
        self.message
            .as_mut()
            .ok_or_else(|| PipelineError::step(step, "message not decoded", String::new()))
    }

    /// Replace the decoded message
    pub fn set_message(&mut self, message: Message) {
        self.message = Some(message);
    }

    /// Serialized form, if any
    pub fn encoded(&self) -> Option<&Bytes> {
        self.encoded.as_ref()
    }

    /// Replace the serialized form
    pub fn set_encoded(&mut self, encoded: Option<Bytes>) {
        self.encoded = encoded;
    }

    /// Whether someone still waits on this container
    pub fn is_pending(&self) -> bool {
        self.completion.is_some()
    }

    /// Resolve the completion handle, later calls are no-ops
    pub fn complete(&mut self, result: Result<(), PipelineError>) {
        if let Some(tx) = self.completion.take() {
            // Caller may have stopped waiting
            let _ = tx.send(result);
        }
    }

    /// Move the payload and completion into a new container, leaving this one empty
    pub fn detach(&mut self) -> MessageContainer {
        MessageContainer {
            message: self.message.take(),
            encoded: self.encoded.take(),
            completion: self.completion.take(),
        }
    }

    /// Short rendering of the message state for diagnostics
    pub fn describe(&self) -> String {
        match (&self.message, &self.encoded) {
            (Some(m), _) => format!(
                "{} id={:?} source={} target={:?}",
                m.content.kind(),
                m.message_id,
                m.source.as_ref().map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                m.target
            ),
            (None, Some(bytes)) => format!("{} encoded bytes", bytes.len()),
            (None, None) => "empty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use mesh_wire::MessageContent;

    #[tokio::test]
    async fn test_completion_resolves_once() {
        let (mut container, completion) = MessageContainer::for_message(Message::new(MessageContent::ConnectionInfoRequest));
        assert!(container.is_pending());
        container.complete(Ok(()));
        container.complete(Err(PipelineError::Cancelled));
        assert!(!container.is_pending());
        assert_eq!(completion.await, Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_container_closes_completion() {
        let (container, completion) = MessageContainer::for_message(Message::new(MessageContent::ConnectionInfoRequest));
        drop(container);
        assert_eq!(completion.await, Err(PipelineError::Closed));
    }

    #[test]
    fn test_detach_moves_everything() {
        let (mut container, mut completion) =
            MessageContainer::for_message(Message::new(MessageContent::ConnectionInfoRequest));
        let mut moved = container.detach();

        assert!(container.message().is_none());
        assert!(!container.is_pending());
        assert_eq!(container.describe(), "empty");
        assert!(moved.message().is_some());
        assert!((&mut completion).now_or_never().is_none());

        moved.complete(Ok(()));
        assert_eq!(completion.now_or_never(), Some(Ok(())));
    }
}
