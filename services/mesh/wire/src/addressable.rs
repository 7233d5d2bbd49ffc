//! Addressable identity and placement lease.

use crate::node::NodeId;
use crate::time::{Clock, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Key half of an addressable identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// Singleton addressable
    None,
    /// String key
    String(String),
    /// 32-bit integer key
    Int32(i32),
    /// 64-bit integer key
    Int64(i64),
    /// GUID key
    Guid(Uuid),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::None => write!(f, "-"),
            Key::String(s) => write!(f, "s:{}", s),
            Key::Int32(v) => write!(f, "i32:{}", v),
            Key::Int64(v) => write!(f, "i64:{}", v),
            Key::Guid(g) => write!(f, "guid:{}", g),
        }
    }
}

/// Globally unique identity of one logical addressable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressableReference {
    /// Addressable type name, matched against node capabilities
    #[serde(rename = "type")]
    pub addressable_type: String,
    /// Instance key
    pub key: Key,
}

impl AddressableReference {
    /// Create a reference
    pub fn new(addressable_type: impl Into<String>, key: Key) -> Self {
        Self {
            addressable_type: addressable_type.into(),
            key,
        }
    }
}

impl fmt::Display for AddressableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addressable_type, self.key)
    }
}

/// Binds one addressable to the node currently hosting it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressableLease {
    /// Hosting node
    pub node_id: NodeId,
    /// Leased addressable
    pub reference: AddressableReference,
    /// Hard deadline
    pub expires_at: Timestamp,
    /// Soft deadline
    pub renew_at: Timestamp,
}

impl AddressableLease {
    /// Issue a lease placing `reference` on `node_id`
    pub fn issue(
        node_id: NodeId,
        reference: AddressableReference,
        clock: &Clock,
        lease_duration: Duration,
        renew_interval: Duration,
    ) -> Self {
        Self {
            node_id,
            reference,
            expires_at: clock.after(lease_duration),
            renew_at: clock.after(renew_interval.min(lease_duration)),
        }
    }

    /// Same placement with fresh deadlines
    pub fn renewed(&self, clock: &Clock, lease_duration: Duration, renew_interval: Duration) -> Self {
        Self::issue(
            self.node_id.clone(),
            self.reference.clone(),
            clock,
            lease_duration,
            renew_interval,
        )
    }

    /// Whether the hard deadline has passed
    pub fn is_expired(&self, clock: &Clock) -> bool {
        clock.in_past(&self.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_display() {
        let r = AddressableReference::new("Greeter", Key::String("bob".to_string()));
        assert_eq!(r.to_string(), "Greeter/s:bob");
        let r = AddressableReference::new("Counter", Key::Int64(7));
        assert_eq!(r.to_string(), "Counter/i64:7");
        let r = AddressableReference::new("Singleton", Key::None);
        assert_eq!(r.to_string(), "Singleton/-");
    }

    #[test]
    fn test_lease_expiry() {
        let clock = Clock::new();
        let lease = AddressableLease::issue(
            NodeId::new("a", "ns"),
            AddressableReference::new("Greeter", Key::Int32(1)),
            &clock,
            Duration::from_secs(600),
            Duration::from_secs(300),
        );
        assert!(lease.renew_at <= lease.expires_at);
        assert!(!lease.is_expired(&clock));

        clock.advance(Duration::from_secs(601));
        assert!(lease.is_expired(&clock));

        let renewed = lease.renewed(&clock, Duration::from_secs(600), Duration::from_secs(300));
        assert!(!renewed.is_expired(&clock));
        assert_eq!(renewed.node_id, lease.node_id);
    }
}
