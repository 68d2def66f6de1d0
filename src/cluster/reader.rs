// ABOUTME: Bounded reads against cluster and registry bindings.
// ABOUTME: A call that outlives its timeout surfaces as a transient TimedOut error.

use std::time::Duration;

use super::observation::ReplicaObservation;
use super::traits::{ClusterError, ClusterOps, RegistryError, RegistryOps};
use crate::rollout::Workload;
use crate::types::ImageRef;

/// Observe `workload`, giving up after `timeout`.
pub async fn observe_with_timeout<C: ClusterOps + ?Sized>(
    cluster: &C,
    workload: &Workload,
    timeout: Duration,
) -> Result<ReplicaObservation, ClusterError> {
    match tokio::time::timeout(timeout, cluster.observe(workload)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(workload = %workload.key, ?timeout, "observe timed out");
            Err(ClusterError::TimedOut(timeout))
        }
    }
}

/// Look up `reference`, giving up after `timeout`.
pub async fn lookup_with_timeout<R: RegistryOps + ?Sized>(
    registry: &R,
    reference: &ImageRef,
    timeout: Duration,
) -> Result<Option<String>, RegistryError> {
    match tokio::time::timeout(timeout, registry.lookup(reference)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(image = %reference, ?timeout, "registry lookup timed out");
            Err(RegistryError::TimedOut(timeout))
        }
    }
}
