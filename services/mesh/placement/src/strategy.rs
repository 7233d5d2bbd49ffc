//! Host selection among capable nodes.

use mesh_wire::{AddressableReference, NodeId, NodeInfo};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Picks a host for a new addressable
pub trait PlacementStrategy: Send + Sync + fmt::Debug {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Choose one of `candidates`, all of which can host `reference`
    fn choose<'a>(&self, reference: &AddressableReference, candidates: &'a [NodeInfo]) -> Option<&'a NodeInfo>;
}

/// Uniform random choice, no load signal
#[derive(Debug, Clone, Default)]
pub struct RandomPlacement;

impl PlacementStrategy for RandomPlacement {
    fn name(&self) -> &'static str {
        "random"
    }

    fn choose<'a>(&self, _reference: &AddressableReference, candidates: &'a [NodeInfo]) -> Option<&'a NodeInfo> {
        candidates.choose(&mut rand::thread_rng())
    }
}

/// Local node when it is a candidate, otherwise random
#[derive(Debug, Clone)]
pub struct PreferLocalPlacement {
    local: NodeId,
}

impl PreferLocalPlacement {
    /// Prefer `local`
    pub fn new(local: NodeId) -> Self {
        Self { local }
    }
}

impl PlacementStrategy for PreferLocalPlacement {
    fn name(&self) -> &'static str {
        "prefer-local"
    }

    fn choose<'a>(&self, reference: &AddressableReference, candidates: &'a [NodeInfo]) -> Option<&'a NodeInfo> {
        if let Some(local) = candidates.iter().find(|n| n.id == self.local) {
            return Some(local);
        }
        debug!("Local node cannot host {}, falling back to random", reference);
        RandomPlacement.choose(reference, candidates)
    }
}

/// Configured strategy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategyKind {
    /// [`RandomPlacement`]
    #[default]
    Random,
    /// [`PreferLocalPlacement`]
    PreferLocal,
}

impl PlacementStrategyKind {
    /// Instantiate the strategy for a node
    pub fn build(self, local: &NodeId) -> Arc<dyn PlacementStrategy> {
        match self {
            PlacementStrategyKind::Random => Arc::new(RandomPlacement),
            PlacementStrategyKind::PreferLocal => Arc::new(PreferLocalPlacement::new(local.clone())),
        }
    }
}

impl FromStr for PlacementStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(PlacementStrategyKind::Random),
            "prefer-local" | "prefer_local" | "local" => Ok(PlacementStrategyKind::PreferLocal),
            other => Err(format!("unknown placement strategy: {}", other)),
        }
    }
}

impl fmt::Display for PlacementStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStrategyKind::Random => write!(f, "random"),
            PlacementStrategyKind::PreferLocal => write!(f, "prefer-local"),
        }
    }
}
