//! Pending response tracking

use dashmap::DashMap;
use mesh_wire::{Message, MessageContent};
use tokio::sync::oneshot;
use tracing::debug;

/// Correlates responses with outstanding requests by message id
#[derive(Debug, Default)]
pub struct ResponseTracker {
    pending: DashMap<i64, oneshot::Sender<MessageContent>>,
}

impl ResponseTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for the response to `message_id`
    pub fn register(&self, message_id: i64) -> oneshot::Receiver<MessageContent> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(message_id, tx);
        rx
    }

    /// Hand a response to its waiter, `false` if nobody waits on it
    pub fn complete(&self, response: &Message) -> bool {
        let Some(message_id) = response.message_id else {
            return false;
        };
        match self.pending.remove(&message_id) {
            Some((_, tx)) => tx.send(response.content.clone()).is_ok(),
            None => {
                debug!("No pending request for response {}", message_id);
                false
            }
        }
    }

    /// Stop waiting for `message_id`
    pub fn cancel(&self, message_id: i64) {
        self.pending.remove(&message_id);
    }

    /// Number of outstanding requests
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
