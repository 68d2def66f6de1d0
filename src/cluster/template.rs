// ABOUTME: Container template applied to every replica a binding creates.
// ABOUTME: Env, labels, command and health check shared by all replicas of a workload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    /// Test command, e.g. `["CMD-SHELL", "curl -f localhost/health"]`.
    pub test: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub start_period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTemplate {
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub healthcheck: Option<HealthcheckSpec>,
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for ContainerTemplate {
    fn default() -> Self {
        Self {
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            command: None,
            healthcheck: None,
            stop_timeout: Duration::from_secs(30),
        }
    }
}
