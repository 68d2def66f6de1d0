// ABOUTME: Replica health check configuration.
// ABOUTME: A replica counts as ready once this command reports healthy.

use serde::Deserialize;
use std::time::Duration;

use crate::cluster::HealthcheckSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct HealthcheckConfig {
    /// Shell command run inside the replica; exit code 0 means healthy.
    pub cmd: String,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_start_period", with = "humantime_serde")]
    pub start_period: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retries() -> u32 {
    3
}

fn default_start_period() -> Duration {
    Duration::from_secs(30)
}

impl HealthcheckConfig {
    pub fn to_spec(&self) -> HealthcheckSpec {
        HealthcheckSpec {
            test: vec!["CMD-SHELL".to_string(), self.cmd.clone()],
            interval: self.interval,
            timeout: self.timeout,
            retries: self.retries,
            start_period: self.start_period,
        }
    }
}
