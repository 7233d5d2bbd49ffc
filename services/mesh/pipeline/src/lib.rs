//! Bidirectional message pipeline for mesh.
//!
//! Every message a node sends or receives walks the same fixed array of
//! [`PipelineStep`]s. Outbound traversals run the array front to back,
//! inbound traversals back to front:
//!
//! ```text
//!  index:      0          1          2          3          4             5
//!          Execution  Identity  Placement  Routing  Serialization  Transport
//!  outbound  ───────────────────────────────────────────────────────────▶ network
//!  inbound   ◀─────────────────────────────────────────────────────────── network
//! ```
//!
//! A step either hands the message to the next step, finishes the traversal
//! or re-injects the message as a brand new traversal (for instance an
//! inbound message that is only passing through becomes an outbound one).
//!
//! Messages are queued on one bounded intake queue and processed by a fixed
//! pool of worker tasks ("rails"). Admission never blocks: a full queue fails
//! the message with [`PipelineError::CapacityExceeded`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod steps;
pub mod tracker;
pub mod transport;

use std::time::Duration;

// Re-export main types
pub use container::{Completion, MessageContainer};
pub use context::{Direction, PipelineContext, PipelineStep};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineHandle, PipelineStats};
pub use steps::ExecutionDispatcher;
pub use tracker::ResponseTracker;
pub use transport::{LocalHub, Transport, TransportError};

/// Pipeline sizing
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker rails
    pub rails: usize,
    /// Intake queue capacity
    pub queue_capacity: usize,
    /// Time an invocation waits for its response
    pub invocation_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rails: 32,
            queue_capacity: 10_000,
            invocation_timeout: Duration::from_secs(30),
        }
    }
}
