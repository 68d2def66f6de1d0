// ABOUTME: Narrow capability traits the rollout state machine needs from a cluster and a registry.
// ABOUTME: Bindings classify raw transport failures into these error enums at the boundary.

use async_trait::async_trait;
use std::time::Duration;

use super::observation::ReplicaObservation;
use super::sealed::Sealed;
use crate::rollout::{RolloutStep, Workload};
use crate::types::ImageRef;

/// Workload status query and mutation.
#[async_trait]
pub trait ClusterOps: Sealed + Send + Sync {
    /// Observe the replicas of `workload`. Side-effect free.
    ///
    /// Bindings with a workload object report a missing one as
    /// `WorkloadNotFound`. Label-based bindings may instead observe zero
    /// replicas, in which case a rollout scales the workload up from nothing.
    async fn observe(&self, workload: &Workload) -> Result<ReplicaObservation, ClusterError>;

    /// Issue one mutation. Returns once the cluster has accepted it; the
    /// effect becomes visible through later observations.
    async fn apply(&self, workload: &Workload, step: &RolloutStep) -> Result<(), ClusterError>;
}

/// Read-only registry access.
#[async_trait]
pub trait RegistryOps: Sealed + Send + Sync {
    /// Digest of the manifest `reference` points at, or `None` when nothing
    /// has been pushed under it yet.
    async fn lookup(&self, reference: &ImageRef) -> Result<Option<String>, RegistryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("mutation rejected: {0}")]
    Rejected(String),

    #[error("cluster call timed out after {0:?}")]
    TimedOut(Duration),
}

impl ClusterError {
    /// Whether a later call could succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Unreachable(_) | ClusterError::TimedOut(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("registry refused credentials: {0}")]
    Unauthorized(String),

    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("registry lookup timed out after {0:?}")]
    TimedOut(Duration),
}

impl RegistryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Unreachable(_) | RegistryError::TimedOut(_))
    }
}
