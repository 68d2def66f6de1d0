// ABOUTME: Cluster and registry capability traits plus their bindings.
// ABOUTME: Docker Engine over bollard for real clusters, an in-memory simulator for tests.

mod docker;
mod observation;
mod reader;
pub(crate) mod sealed;
mod simulated;
mod template;
mod traits;

pub use docker::{
    DockerCluster, LABEL_CONTAINER, LABEL_IMAGE, LABEL_MANAGED, LABEL_NAME, LABEL_NAMESPACE,
    LABEL_WORKLOAD,
};
pub use observation::{ReplicaCounts, ReplicaObservation, ReplicaSnapshot};
pub use reader::{lookup_with_timeout, observe_with_timeout};
pub use simulated::SimulatedCluster;
pub use template::{ContainerTemplate, HealthcheckSpec};
pub use traits::{ClusterError, ClusterOps, RegistryError, RegistryOps};
