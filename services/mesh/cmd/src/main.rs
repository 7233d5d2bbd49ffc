//! Mesh node binary.
//!
//! Joins one or more nodes to the addressable mesh, keeps their leases and
//! cluster views fresh and runs their pipelines until Ctrl-C, then leaves the
//! cluster cleanly.

use clap::Parser;
use mesh_pipeline::LocalHub;
use mesh_placement::PlacementStrategyKind;
use mesh_routing::Router;
use mesh_wire::Clock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod node;

use config::{DirectoryBackend, NodeConfig};
use logging::MeshLogFormatter;
use node::{Directories, EchoDispatcher, MeshNode};

/// Crates whose log level follows `--log-level`
const LOG_TARGETS: &[&str] = &[
    "mesh_node",
    "mesh_wire",
    "mesh_storage",
    "mesh_topology",
    "mesh_cluster",
    "mesh_placement",
    "mesh_routing",
    "mesh_pipeline",
];

/// Addressable mesh node
#[derive(Parser, Debug)]
#[command(name = "mesh-node", version, about = "Addressable mesh node")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Namespace to join
    #[arg(long)]
    namespace: Option<String>,

    /// Addressable type this node can host (repeatable)
    #[arg(long = "capability")]
    capabilities: Vec<String>,

    /// Nodes to run in this process
    #[arg(long, default_value_t = 1)]
    nodes: usize,

    /// Directory backend: memory, redis
    #[arg(long)]
    directory: Option<DirectoryBackend>,

    /// Redis URL for the redis directory backend
    #[arg(long)]
    redis_url: Option<String>,

    /// Placement strategy: random, prefer-local
    #[arg(long)]
    placement: Option<PlacementStrategyKind>,

    /// Cluster view refresh interval, e.g. 1s
    #[arg(long)]
    tick_interval: Option<humantime::Duration>,
}

impl Args {
    /// Command-line values win over the file and the environment
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if !self.capabilities.is_empty() {
            config.capabilities = self.capabilities.clone();
        }
        if let Some(directory) = self.directory {
            config.directory = directory;
        }
        if let Some(url) = &self.redis_url {
            config.redis_url = url.clone();
        }
        if let Some(placement) = self.placement {
            config.placement_strategy = placement;
        }
        if let Some(interval) = self.tick_interval {
            config.tick_interval = interval.into();
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut env_filter = EnvFilter::new("info");
    for target in LOG_TARGETS {
        env_filter = env_filter.add_directive(format!("{}={}", target, args.log_level).parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(MeshLogFormatter::new("mesh"))
        .init();

    component_info!("node", "Starting mesh node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = NodeConfig::load_from_file(&args.config)?;
    args.apply(&mut config);

    let directories = Directories::open(&config).await?;
    let clock = Clock::new();
    let hub = Arc::new(LocalHub::new());

    let mut nodes = Vec::with_capacity(args.nodes.max(1));
    for _ in 0..args.nodes.max(1) {
        let node = MeshNode::start(&config, &directories, clock.clone(), hub.clone(), Arc::new(EchoDispatcher)).await?;
        nodes.push(node);
    }
    component_info!(
        "node",
        "{} node(s) running in namespace {} with capabilities {:?}",
        nodes.len(),
        config.namespace,
        config.capabilities
    );

    tokio::signal::ctrl_c().await?;
    component_info!("node", "Shutdown requested");

    for node in nodes {
        component_info!(
            "pipeline",
            "{} pipeline: {}",
            node.id(),
            serde_json::to_string(&node.pipeline().stats())?
        );
        component_info!("routing", "{} router: {}", node.id(), serde_json::to_string(&node.router().stats())?);
        node.shutdown().await?;
    }

    component_info!("node", "Mesh node stopped");
    Ok(())
}
