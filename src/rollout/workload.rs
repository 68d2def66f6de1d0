// ABOUTME: The replicated workload a rollout targets and its surge/unavailability budget.
// ABOUTME: Construction validates the invariants; the executor never sees an invalid workload.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cluster::ContainerTemplate;
use crate::types::{ImageRef, WorkloadKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkloadError {
    #[error("desired replica count must be at least 1")]
    ZeroReplicas,

    #[error("max_surge and max_unavailable cannot both be zero")]
    NoBudget,

    #[error("readiness timeout must be positive")]
    ZeroReadinessTimeout,

    #[error("container name cannot be empty")]
    EmptyContainer,
}

/// How far a rollout may deviate from the desired replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStrategy {
    /// Replicas allowed above desired while rolling.
    pub max_surge: u32,
    /// Ready replicas allowed below desired while rolling.
    pub max_unavailable: u32,
    /// Longest wait for forward progress before the rollout stalls.
    #[serde(with = "humantime_serde")]
    pub readiness_timeout: Duration,
}

impl RolloutStrategy {
    pub fn new(
        max_surge: u32,
        max_unavailable: u32,
        readiness_timeout: Duration,
    ) -> Result<Self, WorkloadError> {
        if max_surge == 0 && max_unavailable == 0 {
            return Err(WorkloadError::NoBudget);
        }
        if readiness_timeout.is_zero() {
            return Err(WorkloadError::ZeroReadinessTimeout);
        }
        Ok(Self {
            max_surge,
            max_unavailable,
            readiness_timeout,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub key: WorkloadKey,
    pub desired: u32,
    pub container: String,
    /// Image the workload is believed to run, when known from configuration.
    pub current_image: Option<ImageRef>,
    pub strategy: RolloutStrategy,
    #[serde(default)]
    pub template: ContainerTemplate,
}

impl Workload {
    pub fn new(
        key: WorkloadKey,
        desired: u32,
        container: impl Into<String>,
        strategy: RolloutStrategy,
    ) -> Result<Self, WorkloadError> {
        let container = container.into();
        if desired == 0 {
            return Err(WorkloadError::ZeroReplicas);
        }
        if container.trim().is_empty() {
            return Err(WorkloadError::EmptyContainer);
        }
        Ok(Self {
            key,
            desired,
            container,
            current_image: None,
            strategy,
            template: ContainerTemplate::default(),
        })
    }

    pub fn with_template(mut self, template: ContainerTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_current_image(mut self, image: ImageRef) -> Self {
        self.current_image = Some(image);
        self
    }
}
