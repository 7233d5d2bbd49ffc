//! Multi-hop route computation and validation for mesh.
//!
//! Routes are computed on the connectivity graph of the latest cluster
//! snapshot. A route handed in by a caller (a "projected" route) is checked
//! edge by edge against the current graph and reused when still intact;
//! otherwise a fresh shortest path is searched.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mesh;
pub mod router;

pub use mesh::MeshRouter;
pub use router::*;
