// ABOUTME: Docker Engine binding: replicas are labelled containers, readiness is container health.
// ABOUTME: Also answers registry lookups through the engine's distribution inspect endpoint.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::{ContainerCreateBody, HealthConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use super::observation::{ReplicaObservation, ReplicaSnapshot};
use super::sealed::Sealed;
use super::traits::{ClusterError, ClusterOps, RegistryError, RegistryOps};
use crate::config::{ClusterConfig, ClusterEndpoint, RegistryCredentials};
use crate::rollout::{RolloutStep, Workload};
use crate::types::{ImageRef, ReplicaId};

pub const LABEL_MANAGED: &str = "ferry.managed";
pub const LABEL_WORKLOAD: &str = "ferry.workload";
pub const LABEL_NAMESPACE: &str = "ferry.namespace";
pub const LABEL_NAME: &str = "ferry.name";
pub const LABEL_IMAGE: &str = "ferry.image";
pub const LABEL_CONTAINER: &str = "ferry.container";

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_engine_error(e: bollard::errors::Error, timeout: Duration) -> ClusterError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ClusterError::WorkloadNotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if (400..500).contains(status_code) => ClusterError::Rejected(message.clone()),
        bollard::errors::Error::RequestTimeoutError => ClusterError::TimedOut(timeout),
        _ => ClusterError::Unreachable(e.to_string()),
    }
}

/// Container creation fails with 404 when the image is missing; that is a
/// rejected mutation, not a missing workload.
fn map_create_error(e: bollard::errors::Error, timeout: Duration) -> ClusterError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ClusterError::Rejected(message.clone()),
        _ => map_engine_error(e, timeout),
    }
}

fn map_registry_error(e: bollard::errors::Error) -> RegistryError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 401 || *status_code == 403 => {
            RegistryError::Unauthorized(message.clone())
        }
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 400 => RegistryError::InvalidReference(message.clone()),
        _ => RegistryError::Unreachable(e.to_string()),
    }
}

// =============================================================================
// DockerCluster
// =============================================================================

#[derive(Clone)]
pub struct DockerCluster {
    client: Docker,
    timeout: Duration,
    credentials: Option<DockerCredentials>,
}

/// A replica as listed by the engine, before readiness is decided.
struct ListedReplica {
    id: String,
    image: ImageRef,
    ready: bool,
}

impl DockerCluster {
    pub fn connect(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let timeout_secs = config.timeout.as_secs().max(1);
        let client = match &config.endpoint {
            ClusterEndpoint::Unix(path) => Docker::connect_with_unix(
                &path.to_string_lossy(),
                timeout_secs,
                bollard::API_DEFAULT_VERSION,
            ),
            ClusterEndpoint::Http(address) => {
                Docker::connect_with_http(address, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| ClusterError::Unreachable(format!("{}: {}", config.endpoint, e)))?;

        Ok(Self {
            client,
            timeout: config.timeout,
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Option<RegistryCredentials>) -> Self {
        self.credentials = credentials.map(|c| DockerCredentials {
            username: Some(c.username),
            password: Some(c.password),
            ..Default::default()
        });
        self
    }

    pub async fn ping(&self) -> Result<(), ClusterError> {
        self.client
            .ping()
            .await
            .map_err(|e| map_engine_error(e, self.timeout))?;
        Ok(())
    }

    async fn list_replicas(&self, workload: &Workload) -> Result<Vec<ListedReplica>, ClusterError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![
                format!("{}=true", LABEL_MANAGED),
                format!("{}={}", LABEL_WORKLOAD, workload.key.file_stem()),
            ],
        );

        let opts = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(opts))
            .await
            .map_err(|e| map_engine_error(e, self.timeout))?;

        let mut replicas = Vec::with_capacity(containers.len());
        for container in containers {
            let labels = container.labels.unwrap_or_default();
            let raw_image = labels
                .get(LABEL_IMAGE)
                .cloned()
                .or(container.image)
                .unwrap_or_default();
            let Ok(image) = ImageRef::parse(&raw_image) else {
                tracing::warn!(workload = %workload.key, image = %raw_image, "skipping replica with unparseable image");
                continue;
            };

            let state = container
                .state
                .map(|s| format!("{:?}", s).to_lowercase())
                .unwrap_or_default();
            let status = container.status.unwrap_or_default();

            replicas.push(ListedReplica {
                id: container.id.unwrap_or_default(),
                image,
                ready: is_ready(&state, &status),
            });
        }
        Ok(replicas)
    }

    async fn ensure_image(&self, image: &ImageRef) -> Result<(), ClusterError> {
        let image_name = image.to_string();
        match self.client.inspect_image(&image_name).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(map_engine_error(e, self.timeout)),
        }

        tracing::debug!(image = %image_name, "pulling image");
        let opts = CreateImageOptions {
            from_image: Some(image_name.clone()),
            ..Default::default()
        };
        let mut stream = self
            .client
            .create_image(Some(opts), None, self.credentials.clone());
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| map_create_error(e, self.timeout))?;
        }
        Ok(())
    }

    async fn start_replica(&self, workload: &Workload, image: &ImageRef) -> Result<(), ClusterError> {
        let suffix = uuid::Uuid::now_v7().simple().to_string();
        let name = format!(
            "{}-{}",
            workload.key.file_stem(),
            &suffix[suffix.len() - 12..]
        );

        let template = &workload.template;
        let mut labels: HashMap<String, String> = template
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_WORKLOAD.to_string(), workload.key.file_stem());
        labels.insert(
            LABEL_NAMESPACE.to_string(),
            workload.key.namespace.to_string(),
        );
        labels.insert(LABEL_NAME.to_string(), workload.key.name.to_string());
        labels.insert(LABEL_IMAGE.to_string(), image.to_string());
        labels.insert(LABEL_CONTAINER.to_string(), workload.container.clone());

        let env: Vec<String> = template
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let healthcheck = template.healthcheck.as_ref().map(|hc| HealthConfig {
            test: Some(hc.test.clone()),
            interval: Some(hc.interval.as_nanos() as i64),
            timeout: Some(hc.timeout.as_nanos() as i64),
            retries: Some(hc.retries as i64),
            start_period: Some(hc.start_period.as_nanos() as i64),
            start_interval: None,
        });

        let body = ContainerCreateBody {
            image: Some(image.to_string()),
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(labels),
            cmd: template.command.clone(),
            healthcheck,
            stop_timeout: Some(template.stop_timeout.as_secs() as i64),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(name.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(opts), body)
            .await
            .map_err(|e| map_create_error(e, self.timeout))?;

        self.client
            .start_container(
                &response.id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
            .map_err(|e| map_engine_error(e, self.timeout))?;

        tracing::debug!(workload = %workload.key, container = %name, image = %image, "replica started");
        Ok(())
    }

    async fn remove_replica(&self, workload: &Workload, id: &str) -> Result<(), ClusterError> {
        let stop = StopContainerOptions {
            t: Some(workload.template.stop_timeout.as_secs() as i32),
            signal: None,
        };

        // Already-stopped containers answer 304; removal below still applies.
        match self.client.stop_container(id, Some(stop)).await {
            Ok(())
            | Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(e) => return Err(map_engine_error(e, self.timeout)),
        }

        let remove = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.client.remove_container(id, Some(remove)).await {
            Ok(())
            | Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(map_engine_error(e, self.timeout)),
        }
    }

    /// Remove `count` replicas selected by `select`, unready ones first.
    async fn scale_down(
        &self,
        workload: &Workload,
        count: u32,
        select: impl Fn(&ListedReplica) -> bool,
    ) -> Result<(), ClusterError> {
        let mut candidates: Vec<ListedReplica> = self
            .list_replicas(workload)
            .await?
            .into_iter()
            .filter(|r| select(r))
            .collect();
        candidates.sort_by_key(|r| r.ready);

        for replica in candidates.iter().take(count as usize) {
            self.remove_replica(workload, &replica.id).await?;
            tracing::debug!(workload = %workload.key, replica = %replica.id, image = %replica.image, "replica removed");
        }
        Ok(())
    }
}

/// Running and not reported unhealthy or still starting. Containers without
/// a health check are ready as soon as they run.
fn is_ready(state: &str, status: &str) -> bool {
    state == "running" && !status.contains("(unhealthy)") && !status.contains("(health: starting)")
}

impl Sealed for DockerCluster {}

#[async_trait]
impl ClusterOps for DockerCluster {
    /// A workload is whatever carries its labels, so an unknown workload
    /// observes as zero replicas and the first rollout creates it. This
    /// binding never reports `WorkloadNotFound` from here.
    async fn observe(&self, workload: &Workload) -> Result<ReplicaObservation, ClusterError> {
        let replicas = self
            .list_replicas(workload)
            .await?
            .into_iter()
            .map(|r| ReplicaSnapshot {
                id: ReplicaId::new(r.id),
                image: r.image,
                ready: r.ready,
            })
            .collect();
        Ok(ReplicaObservation::new(workload.desired, replicas))
    }

    async fn apply(&self, workload: &Workload, step: &RolloutStep) -> Result<(), ClusterError> {
        match step {
            RolloutStep::ScaleUp { image, count } => {
                self.ensure_image(image).await?;
                for _ in 0..*count {
                    self.start_replica(workload, image).await?;
                }
                Ok(())
            }
            RolloutStep::RetireOutdated { keep, count } => {
                self.scale_down(workload, *count, |r| !r.image.same_image(keep))
                    .await
            }
            RolloutStep::TrimUpdated { image, count } => {
                self.scale_down(workload, *count, |r| r.image.same_image(image))
                    .await
            }
        }
    }
}

#[async_trait]
impl RegistryOps for DockerCluster {
    async fn lookup(&self, reference: &ImageRef) -> Result<Option<String>, RegistryError> {
        let image_name = reference.to_string();
        match self
            .client
            .inspect_registry_image(&image_name, self.credentials.clone())
            .await
        {
            Ok(inspect) => Ok(inspect.descriptor.digest),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(map_registry_error(e)),
        }
    }
}
