//! Wire protocol error types.

use thiserror::Error;

/// Data model errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Lease timestamps out of order
    #[error("lease renew_at {renew_at} is after expires_at {expires_at}")]
    LeaseOrder {
        /// Soft deadline
        renew_at: String,
        /// Hard deadline
        expires_at: String,
    },

    /// Route consumed on the wrong node
    #[error("route hop {expected} consumed on node {actual}")]
    HopMismatch {
        /// Hop recorded in the route
        expected: String,
        /// Node that consumed it
        actual: String,
    },

    /// Route has no hops left
    #[error("route exhausted")]
    RouteExhausted,
}

/// Envelope codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Message could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded into a message
    #[error("decode failed: {0}")]
    Decode(String),

    /// Empty input
    #[error("empty envelope")]
    Empty,
}
