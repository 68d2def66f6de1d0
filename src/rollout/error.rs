// ABOUTME: Rollout error taxonomy with programmatic kinds.
// ABOUTME: Raw cluster and registry errors are reclassified here at the component boundary.

use crate::cluster::{ClusterError, RegistryError};
use crate::types::{BuildId, WorkloadKey};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RolloutError {
    #[error("transient cluster error: {0}")]
    TransientCluster(String),

    #[error("transient registry error: {0}")]
    TransientRegistry(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("mutation rejected by admission: {0}")]
    AdmissionRejected(String),

    #[error("workload {workload} already has an active rollout ({holder})")]
    Conflict { workload: WorkloadKey, holder: String },

    #[error("rollout stalled: {0}")]
    StallTimeout(String),

    #[error("cannot resolve build {build}: {reason}")]
    Resolution { build: BuildId, reason: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutErrorKind {
    TransientCluster,
    TransientRegistry,
    Configuration,
    AdmissionRejected,
    Conflict,
    StallTimeout,
    Resolution,
}

impl RolloutError {
    pub fn kind(&self) -> RolloutErrorKind {
        match self {
            RolloutError::TransientCluster(_) => RolloutErrorKind::TransientCluster,
            RolloutError::TransientRegistry(_) => RolloutErrorKind::TransientRegistry,
            RolloutError::Configuration(_) => RolloutErrorKind::Configuration,
            RolloutError::AdmissionRejected(_) => RolloutErrorKind::AdmissionRejected,
            RolloutError::Conflict { .. } => RolloutErrorKind::Conflict,
            RolloutError::StallTimeout(_) => RolloutErrorKind::StallTimeout,
            RolloutError::Resolution { .. } => RolloutErrorKind::Resolution,
        }
    }

    /// Whether polling again could clear the error without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            RolloutErrorKind::TransientCluster | RolloutErrorKind::TransientRegistry
        )
    }

    /// The cause without its category prefix, as recorded on an attempt.
    pub fn cause(&self) -> String {
        match self {
            RolloutError::TransientCluster(cause)
            | RolloutError::TransientRegistry(cause)
            | RolloutError::Configuration(cause)
            | RolloutError::AdmissionRejected(cause)
            | RolloutError::StallTimeout(cause) => cause.clone(),
            RolloutError::Conflict { .. } | RolloutError::Resolution { .. } => self.to_string(),
        }
    }
}

impl From<ClusterError> for RolloutError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Unreachable(_) | ClusterError::TimedOut(_) => {
                RolloutError::TransientCluster(err.to_string())
            }
            ClusterError::WorkloadNotFound(_) => RolloutError::Configuration(err.to_string()),
            ClusterError::Rejected(reason) => RolloutError::AdmissionRejected(reason),
        }
    }
}

impl From<RegistryError> for RolloutError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unreachable(_) | RegistryError::TimedOut(_) => {
                RolloutError::TransientRegistry(err.to_string())
            }
            RegistryError::Unauthorized(_) | RegistryError::InvalidReference(_) => {
                RolloutError::Configuration(err.to_string())
            }
        }
    }
}
