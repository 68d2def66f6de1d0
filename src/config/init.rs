// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Writes a commented ferry.yml template.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{ImageRef, WorkloadName};

use super::{CONFIG_FILENAME, Config};

pub fn init_config(
    dir: &Path,
    workload: Option<&str>,
    repository: Option<&str>,
    force: bool,
) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = Config::template();

    if let Some(name) = workload {
        config.workloads.head.name =
            WorkloadName::new(name).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    }

    if let Some(repo) = repository {
        config.registry.repository =
            ImageRef::parse(repo).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    }

    std::fs::write(&config_path, generate_template_yaml(&config))?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    let workload = config.workloads.first();
    format!(
        r#"cluster:
  endpoint: {endpoint}
  timeout: 30s

registry:
  repository: {repository}
  tag_template: "{{build}}"
  wait_window: 5m
  timeout: 10s
  # username: {{ env: REGISTRY_USER }}
  # password: {{ env: REGISTRY_PASSWORD }}

rollout:
  poll_interval: 5s
  stall_after_polls: 12
  rollback: true

workloads:
  - name: {name}
    namespace: {namespace}
    replicas: {replicas}
    max_surge: {surge}
    max_unavailable: {unavailable}
    readiness_timeout: 5m
"#,
        endpoint = config.cluster.endpoint,
        repository = config.registry.repository.repository(),
        name = workload.name,
        namespace = workload.namespace,
        replicas = workload.replicas,
        surge = workload.max_surge,
        unavailable = workload.max_unavailable,
    )
}
