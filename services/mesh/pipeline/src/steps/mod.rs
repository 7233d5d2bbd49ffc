//! The standard pipeline steps, in array order

mod execution;
mod identity;
mod placement;
mod routing;
mod serialization;
mod transport;

pub use execution::{ExecutionDispatcher, ExecutionStep};
pub use identity::IdentityStep;
pub use placement::PlacementStep;
pub use routing::RoutingStep;
pub use serialization::SerializationStep;
pub use transport::TransportStep;
