// ABOUTME: In-memory cluster and registry with fault injection, driven by tokio time.
// ABOUTME: Backs the integration tests and `ferry simulate`; tracks in-flight mutations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::observation::{ReplicaObservation, ReplicaSnapshot};
use super::sealed::Sealed;
use super::traits::{ClusterError, ClusterOps, RegistryError, RegistryOps};
use crate::rollout::{RolloutStep, Workload};
use crate::types::{ImageRef, ReplicaId, WorkloadKey};

#[derive(Debug, Clone)]
struct SimReplica {
    id: String,
    image: ImageRef,
    started_at: Instant,
}

#[derive(Debug, Default)]
struct SimState {
    workloads: HashMap<WorkloadKey, Vec<SimReplica>>,
    images: HashMap<String, String>,
    never_ready: Vec<ImageRef>,
    readiness_delay: Duration,
    apply_latency: Duration,
    reject_mutations: bool,
    hang_applies: u32,
    fail_observations: u32,
    fail_lookups: u32,
    hang_lookups: u32,
    in_flight: u32,
    max_in_flight: u32,
    mutations: Vec<RolloutStep>,
    lookups: u32,
    next_id: u64,
}

impl SimState {
    fn is_ready(&self, replica: &SimReplica, now: Instant) -> bool {
        !self.never_ready.iter().any(|i| i.same_image(&replica.image))
            && now >= replica.started_at + self.readiness_delay
    }

    fn spawn(&mut self, image: &ImageRef, started_at: Instant) -> SimReplica {
        self.next_id += 1;
        SimReplica {
            id: format!("sim-{:06}", self.next_id),
            image: image.clone(),
            started_at,
        }
    }

    /// Remove up to `count` replicas matching `select`, unready first.
    fn remove(
        &mut self,
        key: &WorkloadKey,
        count: u32,
        select: impl Fn(&SimReplica) -> bool,
    ) -> Result<(), ClusterError> {
        let now = Instant::now();
        let replicas = self
            .workloads
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::WorkloadNotFound(key.to_string()))?;

        let mut victims: Vec<&SimReplica> = replicas.iter().filter(|r| select(r)).collect();
        victims.sort_by_key(|r| self.is_ready(r, now));
        let doomed: Vec<String> = victims
            .into_iter()
            .take(count as usize)
            .map(|r| r.id.clone())
            .collect();

        if let Some(list) = self.workloads.get_mut(key) {
            list.retain(|r| !doomed.contains(&r.id));
        }
        Ok(())
    }
}

/// Simulated cluster. Clones share state, so a test can keep a handle for
/// fault injection and inspection while the coordinator owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedCluster {
    state: Arc<Mutex<SimState>>,
}

/// Decrements the in-flight counter when an apply finishes or is dropped.
struct InFlight {
    state: Arc<Mutex<SimState>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state.lock().in_flight -= 1;
    }
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workload with `count` ready replicas running `image`.
    pub fn add_workload(&self, key: &WorkloadKey, image: &ImageRef, count: u32) {
        let mut state = self.state.lock();
        // Seeded replicas predate any readiness delay.
        let started_at = Instant::now()
            .checked_sub(state.readiness_delay)
            .unwrap_or_else(Instant::now);
        let replicas = (0..count).map(|_| state.spawn(image, started_at)).collect();
        state.workloads.insert(key.clone(), replicas);
    }

    /// Make `reference` resolvable with the given digest.
    pub fn push_image(&self, reference: &ImageRef, digest: &str) {
        self.state
            .lock()
            .images
            .insert(registry_key(reference), digest.to_string());
    }

    /// Replicas running `image` never become ready.
    pub fn never_ready(&self, image: &ImageRef) {
        self.state.lock().never_ready.push(image.clone());
    }

    pub fn set_readiness_delay(&self, delay: Duration) {
        self.state.lock().readiness_delay = delay;
    }

    pub fn set_apply_latency(&self, latency: Duration) {
        self.state.lock().apply_latency = latency;
    }

    /// Every mutation is refused by admission.
    pub fn reject_mutations(&self, reject: bool) {
        self.state.lock().reject_mutations = reject;
    }

    /// The next `n` applies never return.
    pub fn hang_next_applies(&self, n: u32) {
        self.state.lock().hang_applies = n;
    }

    pub fn fail_next_observations(&self, n: u32) {
        self.state.lock().fail_observations = n;
    }

    pub fn fail_next_lookups(&self, n: u32) {
        self.state.lock().fail_lookups = n;
    }

    /// The next `n` registry lookups never return.
    pub fn hang_next_lookups(&self, n: u32) {
        self.state.lock().hang_lookups = n;
    }

    /// Current replicas of `key` as (image, ready) pairs.
    pub fn replicas(&self, key: &WorkloadKey) -> Vec<(ImageRef, bool)> {
        let state = self.state.lock();
        let now = Instant::now();
        state
            .workloads
            .get(key)
            .map(|list| {
                list.iter()
                    .map(|r| (r.image.clone(), state.is_ready(r, now)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Accepted mutations in the order they took effect.
    pub fn mutations(&self) -> Vec<RolloutStep> {
        self.state.lock().mutations.clone()
    }

    /// Highest number of applies that were running at the same time.
    pub fn max_in_flight(&self) -> u32 {
        self.state.lock().max_in_flight
    }

    pub fn lookups(&self) -> u32 {
        self.state.lock().lookups
    }

    fn enter_apply(&self) -> InFlight {
        let mut state = self.state.lock();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        InFlight {
            state: Arc::clone(&self.state),
        }
    }
}

fn registry_key(reference: &ImageRef) -> String {
    format!(
        "{}:{}",
        reference.repository(),
        reference.tag().unwrap_or("latest")
    )
}

impl Sealed for SimulatedCluster {}

#[async_trait]
impl ClusterOps for SimulatedCluster {
    async fn observe(&self, workload: &Workload) -> Result<ReplicaObservation, ClusterError> {
        let mut state = self.state.lock();
        if state.fail_observations > 0 {
            state.fail_observations -= 1;
            return Err(ClusterError::Unreachable("simulated outage".to_string()));
        }

        let now = Instant::now();
        let replicas = state
            .workloads
            .get(&workload.key)
            .ok_or_else(|| ClusterError::WorkloadNotFound(workload.key.to_string()))?
            .iter()
            .map(|r| ReplicaSnapshot {
                id: ReplicaId::new(r.id.clone()),
                image: r.image.clone(),
                ready: state.is_ready(r, now),
            })
            .collect();

        Ok(ReplicaObservation::new(workload.desired, replicas))
    }

    async fn apply(&self, workload: &Workload, step: &RolloutStep) -> Result<(), ClusterError> {
        let _guard = self.enter_apply();

        let (hang, latency) = {
            let mut state = self.state.lock();
            let hang = state.hang_applies > 0;
            if hang {
                state.hang_applies -= 1;
            }
            (hang, state.apply_latency)
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if state.reject_mutations {
            return Err(ClusterError::Rejected("admission denied".to_string()));
        }

        match step {
            RolloutStep::ScaleUp { image, count } => {
                let now = Instant::now();
                let fresh: Vec<SimReplica> = (0..*count).map(|_| state.spawn(image, now)).collect();
                state
                    .workloads
                    .get_mut(&workload.key)
                    .ok_or_else(|| ClusterError::WorkloadNotFound(workload.key.to_string()))?
                    .extend(fresh);
            }
            RolloutStep::RetireOutdated { keep, count } => {
                state.remove(&workload.key, *count, |r| !r.image.same_image(keep))?;
            }
            RolloutStep::TrimUpdated { image, count } => {
                state.remove(&workload.key, *count, |r| r.image.same_image(image))?;
            }
        }
        state.mutations.push(step.clone());
        Ok(())
    }
}

#[async_trait]
impl RegistryOps for SimulatedCluster {
    async fn lookup(&self, reference: &ImageRef) -> Result<Option<String>, RegistryError> {
        let hang = {
            let mut state = self.state.lock();
            state.lookups += 1;
            let hang = state.hang_lookups > 0;
            if hang {
                state.hang_lookups -= 1;
            }
            hang
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        }

        let mut state = self.state.lock();
        if state.fail_lookups > 0 {
            state.fail_lookups -= 1;
            return Err(RegistryError::Unreachable("simulated outage".to_string()));
        }
        Ok(state.images.get(&registry_key(reference)).cloned())
    }
}
