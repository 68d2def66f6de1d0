// ABOUTME: Tunables for the rollout executor: polling, stall detection, retries, timeouts.
// ABOUTME: Every threshold is configuration; nothing about rollback policy is hard-coded.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct RolloutSettings {
    /// Wait between applying a step and re-observing the workload.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Consecutive polls without forward progress before the attempt stalls.
    #[serde(default = "default_stall_after_polls")]
    pub stall_after_polls: u32,

    /// Roll back to the previous image when an attempt stalls.
    #[serde(default = "default_rollback")]
    pub rollback: bool,

    /// Retries for a mutation request that timed out.
    #[serde(default = "default_mutation_retries")]
    pub mutation_retries: u32,

    #[serde(default = "default_backoff_base", with = "humantime_serde")]
    pub backoff_base: Duration,

    #[serde(default = "default_backoff_max", with = "humantime_serde")]
    pub backoff_max: Duration,

    #[serde(default = "default_observe_timeout", with = "humantime_serde")]
    pub observe_timeout: Duration,

    #[serde(default = "default_apply_timeout", with = "humantime_serde")]
    pub apply_timeout: Duration,

    /// Delivery attempts for one audit record.
    #[serde(default = "default_audit_retries")]
    pub audit_retries: u32,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_stall_after_polls() -> u32 {
    12
}

fn default_rollback() -> bool {
    true
}

fn default_mutation_retries() -> u32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(30)
}

fn default_observe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_apply_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_audit_retries() -> u32 {
    5
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            stall_after_polls: default_stall_after_polls(),
            rollback: default_rollback(),
            mutation_retries: default_mutation_retries(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            observe_timeout: default_observe_timeout(),
            apply_timeout: default_apply_timeout(),
            audit_retries: default_audit_retries(),
        }
    }
}

impl RolloutSettings {
    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "rollout.poll_interval must be positive".to_string(),
            ));
        }
        if self.stall_after_polls == 0 {
            return Err(Error::InvalidConfig(
                "rollout.stall_after_polls must be at least 1".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(Error::InvalidConfig(
                "rollout.backoff_base cannot exceed rollout.backoff_max".to_string(),
            ));
        }
        if self.observe_timeout.is_zero() || self.apply_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "rollout timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let settings = RolloutSettings {
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(settings.backoff(1), Duration::from_secs(1));
        assert_eq!(settings.backoff(2), Duration::from_secs(2));
        assert_eq!(settings.backoff(3), Duration::from_secs(4));
        assert_eq!(settings.backoff(4), Duration::from_secs(5));
        assert_eq!(settings.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn zero_stall_threshold_is_invalid() {
        let settings = RolloutSettings {
            stall_after_polls: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
