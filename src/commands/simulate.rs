// ABOUTME: Simulate command implementation.
// ABOUTME: Rolls web:v1 to web:v2 on an in-memory cluster with short real-time intervals.

use super::{conclude, report};
use ferry::cluster::SimulatedCluster;
use ferry::config::{RegistryConfig, RolloutSettings};
use ferry::coordinator::{Coordinator, DeployRequest, ImageSource};
use ferry::error::{Error, Result};
use ferry::output::Output;
use ferry::resolver::ImageResolver;
use ferry::rollout::{RolloutStrategy, Workload};
use ferry::types::{BuildId, ImageRef, Namespace, WorkloadKey, WorkloadName};
use std::time::Duration;

const REPOSITORY: &str = "registry.local/web";
const DIGEST: &str = "sha256:5e1f4d2c";

pub struct SimulateOptions {
    pub replicas: u32,
    pub max_surge: u32,
    pub max_unavailable: u32,
    pub never_ready: bool,
    pub no_rollback: bool,
}

fn invalid(e: impl std::fmt::Display) -> Error {
    Error::InvalidConfig(e.to_string())
}

/// Returns whether the attempt failed.
pub async fn simulate(options: SimulateOptions, mut output: Output) -> Result<bool> {
    output.start_timer();
    let key = WorkloadKey::new(
        Namespace::default(),
        WorkloadName::new("web").map_err(invalid)?,
    );
    let strategy = RolloutStrategy::new(
        options.max_surge,
        options.max_unavailable,
        Duration::from_secs(3),
    )
    .map_err(invalid)?;
    let workload = Workload::new(key.clone(), options.replicas, "app", strategy)
        .map_err(invalid)?;

    let repository = ImageRef::parse(REPOSITORY).map_err(invalid)?;
    let current = repository.with_tag("v1").map_err(invalid)?;
    let next = repository.with_tag("v2").map_err(invalid)?;

    let sim = SimulatedCluster::new();
    sim.set_readiness_delay(Duration::from_millis(200));
    sim.add_workload(&key, &current, options.replicas);
    sim.push_image(&next, DIGEST);
    if options.never_ready {
        sim.never_ready(&next);
    }

    let mut registry = RegistryConfig::new(repository);
    registry.wait_window = Duration::from_secs(1);
    registry.poll_interval = Duration::from_millis(100);
    let settings = RolloutSettings {
        poll_interval: Duration::from_millis(100),
        stall_after_polls: 10,
        rollback: !options.no_rollback,
        backoff_base: Duration::from_millis(50),
        backoff_max: Duration::from_millis(500),
        observe_timeout: Duration::from_secs(1),
        apply_timeout: Duration::from_secs(1),
        ..RolloutSettings::default()
    };

    output.progress(&format!(
        "Simulating {} -> {} on {} replica(s) (surge {}, unavailable {})",
        current, next, options.replicas, options.max_surge, options.max_unavailable
    ));

    let coordinator = Coordinator::new(
        sim.clone(),
        ImageResolver::new(sim.clone(), registry),
        settings,
    );
    let build = BuildId::new("v2").map_err(invalid)?;
    let result = coordinator
        .deploy(DeployRequest::new(workload, ImageSource::Build(build)))
        .await;

    for step in sim.mutations() {
        output.progress(&format!("  → {}", step));
    }
    let tally = report(vec![result], &output)?;
    Ok(conclude(&tally, "Simulation complete!", &output))
}
