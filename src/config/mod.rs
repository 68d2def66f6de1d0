// ABOUTME: Configuration types and parsing for ferry.yml.
// ABOUTME: Handles YAML parsing, validation, discovery, and destination overrides.

mod cluster;
mod deserialize;
mod env_value;
mod healthcheck;
mod init;
mod registry;
mod rollout;
mod workload;

pub use cluster::{ClusterConfig, ClusterEndpoint};
pub use env_value::{EnvValue, resolve_env_map};
pub use healthcheck::HealthcheckConfig;
pub use init::init_config;
pub use registry::{BUILD_PLACEHOLDER, RegistryConfig, RegistryCredentials};
pub use rollout::RolloutSettings;
pub use workload::WorkloadConfig;

use deserialize::deserialize_workloads;

use crate::error::{Error, Result};
use crate::types::{ImageRef, WorkloadName};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "ferry.yml";
pub const CONFIG_FILENAME_ALT: &str = "ferry.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".ferry/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,

    pub registry: RegistryConfig,

    #[serde(default)]
    pub rollout: RolloutSettings,

    #[serde(deserialize_with = "deserialize_workloads")]
    pub workloads: NonEmpty<WorkloadConfig>,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub destinations: HashMap<String, Destination>,
}

/// Named overrides, e.g. `staging` pointing at a different cluster.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Destination {
    #[serde(default)]
    pub cluster: Option<ClusterConfig>,

    #[serde(default)]
    pub registry: Option<RegistryConfig>,

    /// Replica count overrides keyed by workload name.
    #[serde(default)]
    pub replicas: HashMap<String, u32>,

    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".ferry/state")
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;

        // A relative state_dir lives next to the config file, not the caller's cwd.
        if config.state_dir.is_relative()
            && let Some(base) = path.parent()
        {
            let base = if base.ends_with(".ferry") {
                base.parent().unwrap_or(base)
            } else {
                base
            };
            config.state_dir = base.join(&config.state_dir);
        }
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        self.rollout.validate()?;
        for workload in &self.workloads {
            workload.validate()?;
        }
        Ok(())
    }

    pub fn for_destination(&self, name: &str) -> Result<Config> {
        let dest = self
            .destinations
            .get(name)
            .ok_or_else(|| Error::UnknownDestination(name.to_string()))?;

        let mut merged = self.clone();

        if let Some(ref cluster) = dest.cluster {
            merged.cluster = cluster.clone();
        }

        if let Some(ref registry) = dest.registry {
            merged.registry = registry.clone();
        }

        if let Some(ref state_dir) = dest.state_dir {
            merged.state_dir = state_dir.clone();
        }

        for (workload_name, replicas) in &dest.replicas {
            let workload = merged
                .workloads
                .iter_mut()
                .find(|w| w.name.as_str() == workload_name)
                .ok_or_else(|| Error::UnknownWorkload(workload_name.clone()))?;
            workload.replicas = *replicas;
        }

        merged.validate()?;
        Ok(merged)
    }

    /// Workloads selected by name; all of them when `names` is empty.
    pub fn select_workloads(&self, names: &[String]) -> Result<Vec<&WorkloadConfig>> {
        if names.is_empty() {
            return Ok(self.workloads.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.workloads
                    .iter()
                    .find(|w| w.name.as_str() == name)
                    .ok_or_else(|| Error::UnknownWorkload(name.clone()))
            })
            .collect()
    }

    pub fn template() -> Self {
        Config {
            cluster: ClusterConfig::default(),
            registry: RegistryConfig::new(
                ImageRef::parse("registry.example.com/my-app").expect("template image is valid"),
            ),
            rollout: RolloutSettings::default(),
            workloads: NonEmpty::new(WorkloadConfig::new(
                WorkloadName::new("my-app").expect("template name is valid"),
                2,
            )),
            state_dir: default_state_dir(),
            destinations: HashMap::new(),
        }
    }
}
