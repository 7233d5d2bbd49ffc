//! Node, lease, addressable and message types plus the envelope codec for mesh.
//!
//! This crate holds the data model shared by every other mesh crate: node
//! identities and leases, addressable references and their leases, multi-hop
//! routes, the message envelope exchanged between nodes, and the codec that
//! turns an envelope into bytes for the transport.
//!
//! ## Envelope
//!
//! ```text
//! +-------------+--------------------------------------------+
//! | content     | invocation request/response, error, conn   |
//! +-------------+--------------------------------------------+
//! | message_id  | optional i64, stamped on the outbound path |
//! +-------------+--------------------------------------------+
//! | source      | optional NodeId of the originating node    |
//! +-------------+--------------------------------------------+
//! | target      | Unicast(node) or RoutedUnicast(route)      |
//! +-------------+--------------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addressable;
pub mod codec;
pub mod error;
pub mod message;
pub mod node;
pub mod route;
pub mod time;

// Re-export main types
pub use addressable::{AddressableLease, AddressableReference, Key};
pub use codec::{CborCodec, MessageCodec};
pub use error::{CodecError, WireError};
pub use message::{Message, MessageContent, MessageTarget};
pub use node::{NodeCapabilities, NodeId, NodeInfo, NodeLease, NodeStatus};
pub use route::Route;
pub use time::{Clock, Timestamp};
