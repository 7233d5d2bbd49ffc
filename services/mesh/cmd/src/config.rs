//! Configuration handling for the mesh node.
//!
//! Settings come from the shared service config file (the
//! `services.mesh.config` string map) and are then overridden by
//! environment variables and command-line arguments.

use anyhow::Result;
use mesh_cluster::ClusterConfig;
use mesh_pipeline::PipelineConfig;
use mesh_placement::{AddressableConfig, PlacementStrategyKind};
use mesh_storage::DirectoryMode;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Where the node and addressable directories live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryBackend {
    /// In-process maps, only shared by nodes of this process
    #[default]
    Memory,
    /// Shared Redis instance
    Redis,
}

impl FromStr for DirectoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(DirectoryBackend::Memory),
            "redis" => Ok(DirectoryBackend::Redis),
            other => Err(format!("unknown directory backend '{}' (expected memory or redis)", other)),
        }
    }
}

impl fmt::Display for DirectoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryBackend::Memory => write!(f, "memory"),
            DirectoryBackend::Redis => write!(f, "redis"),
        }
    }
}

/// Mesh node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Namespace the node joins
    pub namespace: String,
    /// Addressable types this node can host
    pub capabilities: Vec<String>,
    /// Node lease duration
    pub node_lease_duration: Duration,
    /// Node lease renewal interval
    pub node_renew_interval: Duration,
    /// Addressable lease duration
    pub addressable_lease_duration: Duration,
    /// Addressable lease renewal interval
    pub addressable_renew_interval: Duration,
    /// Pipeline worker rails
    pub pipeline_rails: usize,
    /// Pipeline intake queue capacity
    pub pipeline_buffer: usize,
    /// Time an invocation waits for its response
    pub invocation_timeout: Duration,
    /// Placement strategy
    pub placement_strategy: PlacementStrategyKind,
    /// Interval between cluster view refreshes
    pub tick_interval: Duration,
    /// Directory backend
    pub directory: DirectoryBackend,
    /// Redis URL for the redis backend
    pub redis_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let cluster = ClusterConfig::default();
        let addressable = AddressableConfig::default();
        let pipeline = PipelineConfig::default();
        Self {
            namespace: "default".to_string(),
            capabilities: Vec::new(),
            node_lease_duration: cluster.lease_duration,
            node_renew_interval: cluster.renew_interval,
            addressable_lease_duration: addressable.lease_duration,
            addressable_renew_interval: addressable.renew_interval,
            pipeline_rails: pipeline.rails,
            pipeline_buffer: pipeline.queue_capacity,
            invocation_timeout: pipeline.invocation_timeout,
            placement_strategy: PlacementStrategyKind::default(),
            tick_interval: Duration::from_secs(1),
            directory: DirectoryBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Root of the shared service config file
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    mesh: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    config: Option<HashMap<String, String>>,
}

impl NodeConfig {
    /// Load configuration from file and environment variables.
    ///
    /// A missing or unparsable file leaves the defaults in place.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    if let Some(values) = root.services.and_then(|s| s.mesh).and_then(|m| m.config) {
                        for (key, value) in values {
                            config.apply(&key, &value);
                        }
                    }
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!("Failed to parse config file {:?} ({}), using defaults", config_path.as_ref(), e),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", config_path.as_ref()),
        }

        config.apply_overrides(|name| std::env::var(name).ok());

        info!(
            "Node configuration: namespace={}, rails={}, buffer={}, placement={}, directory={}",
            config.namespace, config.pipeline_rails, config.pipeline_buffer, config.placement_strategy, config.directory
        );
        Ok(config)
    }

    /// Apply one `services.mesh.*` entry, ignoring unknown keys and bad values
    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "services.mesh.namespace" => self.namespace = value.to_string(),
            "services.mesh.capabilities" => {
                self.capabilities = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "services.mesh.node_lease_duration" => set_duration(key, value, &mut self.node_lease_duration),
            "services.mesh.node_renew_interval" => set_duration(key, value, &mut self.node_renew_interval),
            "services.mesh.addressable_lease_duration" => {
                set_duration(key, value, &mut self.addressable_lease_duration)
            }
            "services.mesh.addressable_renew_interval" => {
                set_duration(key, value, &mut self.addressable_renew_interval)
            }
            "services.mesh.invocation_timeout" => set_duration(key, value, &mut self.invocation_timeout),
            "services.mesh.tick_interval" => set_duration(key, value, &mut self.tick_interval),
            "services.mesh.pipeline_rails" => set_parsed(key, value, &mut self.pipeline_rails),
            "services.mesh.pipeline_buffer" => set_parsed(key, value, &mut self.pipeline_buffer),
            "services.mesh.placement_strategy" => set_parsed(key, value, &mut self.placement_strategy),
            "services.mesh.directory" => set_parsed(key, value, &mut self.directory),
            "services.mesh.redis_url" => self.redis_url = value.to_string(),
            _ => {}
        }
    }

    /// Apply `MESH_*` overrides read through `lookup`
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(namespace) = lookup("MESH_NAMESPACE") {
            info!("Namespace overridden by environment: {}", namespace);
            self.namespace = namespace;
        }
        if let Some(rails) = lookup("MESH_PIPELINE_RAILS") {
            set_parsed("MESH_PIPELINE_RAILS", &rails, &mut self.pipeline_rails);
        }
        if let Some(buffer) = lookup("MESH_PIPELINE_BUFFER") {
            set_parsed("MESH_PIPELINE_BUFFER", &buffer, &mut self.pipeline_buffer);
        }
        if let Some(strategy) = lookup("MESH_PLACEMENT_STRATEGY") {
            set_parsed("MESH_PLACEMENT_STRATEGY", &strategy, &mut self.placement_strategy);
        }
        if let Some(url) = lookup("MESH_REDIS_URL") {
            info!("Redis URL overridden by environment");
            self.redis_url = url;
            self.directory = DirectoryBackend::Redis;
        }
    }

    /// Cluster manager settings
    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            lease_duration: self.node_lease_duration,
            renew_interval: self.node_renew_interval,
            ..ClusterConfig::default()
        }
    }

    /// Addressable manager settings
    pub fn addressable_config(&self) -> AddressableConfig {
        AddressableConfig {
            lease_duration: self.addressable_lease_duration,
            renew_interval: self.addressable_renew_interval,
            ..AddressableConfig::default()
        }
    }

    /// Pipeline sizing
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            rails: self.pipeline_rails,
            queue_capacity: self.pipeline_buffer,
            invocation_timeout: self.invocation_timeout,
        }
    }

    /// Backend for the directory named `prefix`
    pub fn directory_mode(&self, prefix: &str) -> DirectoryMode {
        match self.directory {
            DirectoryBackend::Memory => DirectoryMode::InMemory,
            DirectoryBackend::Redis => DirectoryMode::Redis {
                url: self.redis_url.clone(),
                prefix: format!("mesh:{}:{}", self.namespace, prefix),
            },
        }
    }
}

fn set_duration(key: &str, value: &str, target: &mut Duration) {
    match humantime::parse_duration(value) {
        Ok(duration) => *target = duration,
        Err(e) => warn!("Ignoring {}={}: {}", key, value, e),
    }
}

fn set_parsed<T>(key: &str, value: &str, target: &mut T)
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(e) => warn!("Ignoring {}={}: {}", key, value, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.node_lease_duration, Duration::from_secs(10));
        assert_eq!(config.node_renew_interval, Duration::from_secs(5));
        assert_eq!(config.pipeline_rails, 32);
        assert_eq!(config.pipeline_buffer, 10_000);
        assert_eq!(config.placement_strategy, PlacementStrategyKind::Random);
        assert!(matches!(config.directory_mode("nodes"), DirectoryMode::InMemory));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  mesh:
    enabled: true
    executable: ./mesh-node
    config:
      services.mesh.namespace: "orders"
      services.mesh.capabilities: "Greeter, Counter"
      services.mesh.node_lease_duration: "30s"
      services.mesh.addressable_lease_duration: "1h"
      services.mesh.pipeline_rails: "8"
      services.mesh.pipeline_buffer: "not-a-number"
      services.mesh.placement_strategy: "prefer-local"
      services.mesh.unknown_key: "ignored"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = NodeConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.capabilities, vec!["Greeter".to_string(), "Counter".to_string()]);
        assert_eq!(config.node_lease_duration, Duration::from_secs(30));
        assert_eq!(config.addressable_lease_duration, Duration::from_secs(3600));
        assert_eq!(config.pipeline_rails, 8);
        assert_eq!(config.pipeline_buffer, 10_000);
        assert_eq!(config.placement_strategy, PlacementStrategyKind::PreferLocal);
        assert_eq!(config.cluster_config().lease_duration, Duration::from_secs(30));
        assert_eq!(config.pipeline_config().rails, 8);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = NodeConfig::load_from_file("/nonexistent/mesh/config.yaml").unwrap();
        assert_eq!(config.pipeline_rails, NodeConfig::default().pipeline_rails);
    }

    #[test]
    fn test_overrides() {
        let mut config = NodeConfig::default();
        let env: HashMap<&str, &str> = [
            ("MESH_NAMESPACE", "edge"),
            ("MESH_PIPELINE_RAILS", "4"),
            ("MESH_PIPELINE_BUFFER", "128"),
            ("MESH_REDIS_URL", "redis://cache:6379"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.namespace, "edge");
        assert_eq!(config.pipeline_rails, 4);
        assert_eq!(config.pipeline_buffer, 128);
        match config.directory_mode("nodes") {
            DirectoryMode::Redis { url, prefix } => {
                assert_eq!(url, "redis://cache:6379");
                assert_eq!(prefix, "mesh:edge:nodes");
            }
            other => panic!("expected redis, got {:?}", other),
        }
    }
}
