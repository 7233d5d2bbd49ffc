//! Connectivity graph and bounded path search for mesh.
//!
//! The graph is derived from the membership snapshot: vertices are node ids
//! and every node contributes one directed edge per entry of its
//! `visible_nodes`. A graph is never edited after construction; the cluster
//! manager builds a new one on each tick and swaps it in atomically.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;

pub use graph::*;
