//! Node identity, lease and membership record.

use crate::error::WireError;
use crate::time::{Clock, Timestamp};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Length of randomly generated node keys
pub const NODE_KEY_LENGTH: usize = 32;

/// Opaque identity of a node, unique within a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Random key assigned on join
    pub key: String,
    /// Namespace the node belongs to
    pub namespace: String,
}

impl NodeId {
    /// Create a node id from its parts
    pub fn new(key: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            namespace: namespace.into(),
        }
    }

    /// Generate a fresh random node id in `namespace`
    pub fn generate(namespace: &str) -> Self {
        let key: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NODE_KEY_LENGTH)
            .map(char::from)
            .collect();
        Self::new(key, namespace)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

/// Addressable types a node is able to activate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapabilities {
    /// Addressable type names
    pub addressable_types: Vec<String>,
}

impl NodeCapabilities {
    /// Build capabilities from a list of type names
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addressable_types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `addressable_type` can be hosted
    pub fn can_host(&self, addressable_type: &str) -> bool {
        self.addressable_types.iter().any(|t| t == addressable_type)
    }
}

/// Proof of live membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLease {
    /// Secret that must accompany every renewal
    pub challenge_token: String,
    /// Hard deadline, the node is dead after this
    pub expires_at: Timestamp,
    /// Soft deadline, renewal should happen after this
    pub renew_at: Timestamp,
}

impl NodeLease {
    /// Issue a brand new lease with a random challenge token
    pub fn issue(clock: &Clock, lease_duration: Duration, renew_interval: Duration) -> Self {
        Self {
            challenge_token: uuid::Uuid::new_v4().simple().to_string(),
            expires_at: clock.after(lease_duration),
            renew_at: clock.after(renew_interval.min(lease_duration)),
        }
    }

    /// Extend this lease, keeping the challenge token.
    ///
    /// Renewals never move a deadline backwards: if the clock has not moved
    /// past the previous deadlines they advance by one millisecond.
    pub fn renewed(&self, clock: &Clock, lease_duration: Duration, renew_interval: Duration) -> Self {
        let bump = |ts: Timestamp| ts.checked_add_signed(chrono::Duration::milliseconds(1)).unwrap_or(ts);
        let expires_at = clock.after(lease_duration).max(bump(self.expires_at));
        let renew_at = clock
            .after(renew_interval.min(lease_duration))
            .max(bump(self.renew_at))
            .min(expires_at);
        Self {
            challenge_token: self.challenge_token.clone(),
            expires_at,
            renew_at,
        }
    }

    /// Whether the hard deadline has passed
    pub fn is_expired(&self, clock: &Clock) -> bool {
        clock.in_past(&self.expires_at)
    }

    /// Whether the soft deadline has passed
    pub fn needs_renewal(&self, clock: &Clock) -> bool {
        clock.in_past(&self.renew_at)
    }

    /// Check `renew_at <= expires_at`
    pub fn validate(&self) -> Result<(), WireError> {
        if self.renew_at > self.expires_at {
            return Err(WireError::LeaseOrder {
                renew_at: self.renew_at.to_rfc3339(),
                expires_at: self.expires_at.to_rfc3339(),
            });
        }
        Ok(())
    }
}

/// Lifecycle state advertised by a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Accepting new placements
    #[default]
    Active,
    /// Finishing current work, not accepting new placements
    Draining,
}

/// Membership record stored in the node directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identity
    pub id: NodeId,
    /// Addressable types this node can host
    pub capabilities: NodeCapabilities,
    /// Current lease
    pub lease: NodeLease,
    /// Outbound edges of this node in the connectivity graph
    pub visible_nodes: BTreeSet<NodeId>,
    /// Optional externally reachable address
    pub url: Option<String>,
    /// Lifecycle state
    pub status: NodeStatus,
}

impl NodeInfo {
    /// Create a freshly joined node record
    pub fn new(id: NodeId, capabilities: NodeCapabilities, lease: NodeLease, url: Option<String>) -> Self {
        Self {
            id,
            capabilities,
            lease,
            visible_nodes: BTreeSet::new(),
            url,
            status: NodeStatus::Active,
        }
    }

    /// Whether this node's lease is still valid
    pub fn is_alive(&self, clock: &Clock) -> bool {
        !self.lease.is_expired(clock)
    }

    /// Whether new addressables of `addressable_type` may be placed here
    pub fn accepts(&self, addressable_type: &str) -> bool {
        self.status == NodeStatus::Active && self.capabilities.can_host(addressable_type)
    }
}
