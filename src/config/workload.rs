// ABOUTME: Per-workload configuration: replica count, rollout budgets, container template.
// ABOUTME: Converts into the validated Workload the executor works with.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{EnvValue, HealthcheckConfig, resolve_env_map};
use crate::cluster::ContainerTemplate;
use crate::error::{Error, Result};
use crate::rollout::{RolloutStrategy, Workload};
use crate::types::{Namespace, WorkloadKey, WorkloadName};

#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    pub name: WorkloadName,

    #[serde(default)]
    pub namespace: Namespace,

    pub replicas: u32,

    /// Name of the container running the image inside each replica.
    #[serde(default = "default_container")]
    pub container: String,

    #[serde(default = "default_max_surge")]
    pub max_surge: u32,

    #[serde(default)]
    pub max_unavailable: u32,

    #[serde(default = "default_readiness_timeout", with = "humantime_serde")]
    pub readiness_timeout: Duration,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,

    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,
}

fn default_container() -> String {
    "app".to_string()
}

fn default_max_surge() -> u32 {
    1
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(30)
}

impl WorkloadConfig {
    pub fn new(name: WorkloadName, replicas: u32) -> Self {
        Self {
            name,
            namespace: Namespace::default(),
            replicas,
            container: default_container(),
            max_surge: default_max_surge(),
            max_unavailable: 0,
            readiness_timeout: default_readiness_timeout(),
            env: HashMap::new(),
            labels: HashMap::new(),
            command: None,
            healthcheck: None,
            stop_timeout: default_stop_timeout(),
        }
    }

    pub fn key(&self) -> WorkloadKey {
        WorkloadKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Build the validated workload, resolving environment-backed values.
    pub fn to_workload(&self) -> Result<Workload> {
        let strategy =
            RolloutStrategy::new(self.max_surge, self.max_unavailable, self.readiness_timeout)
                .map_err(|e| self.invalid(e))?;

        let template = ContainerTemplate {
            env: resolve_env_map(&self.env)?,
            labels: self.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            command: self.command.clone(),
            healthcheck: self.healthcheck.as_ref().map(HealthcheckConfig::to_spec),
            stop_timeout: self.stop_timeout,
        };

        Workload::new(self.key(), self.replicas, &self.container, strategy)
            .map(|w| w.with_template(template))
            .map_err(|e| self.invalid(e))
    }

    /// Check invariants without resolving env vars (used at config load).
    pub fn validate(&self) -> Result<()> {
        let strategy =
            RolloutStrategy::new(self.max_surge, self.max_unavailable, self.readiness_timeout)
                .map_err(|e| self.invalid(e))?;
        Workload::new(self.key(), self.replicas, &self.container, strategy)
            .map(|_| ())
            .map_err(|e| self.invalid(e))
    }

    fn invalid(&self, err: impl std::fmt::Display) -> Error {
        Error::InvalidConfig(format!("workload {}: {}", self.key(), err))
    }
}
