// ABOUTME: Boundary entry point: accepts deployment requests and runs one attempt per workload.
// ABOUTME: Owns exclusivity, image resolution, persistence, cancellation and audit delivery.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

use crate::cluster::{ClusterOps, RegistryOps, observe_with_timeout};
use crate::config::RolloutSettings;
use crate::diagnostics::{Diagnostics, WarningKind};
use crate::error::{Error, Result};
use crate::resolver::ImageResolver;
use crate::rollout::{
    AttemptPhase, Checkpoint, ExecContext, Outcome, Rehydrated, Rollout, RolloutAttempt,
    RolloutError, Workload,
};
use crate::store::{
    AttemptStore, AuditSink, MemoryAuditLog, REFRESH_EVERY, StoreError, WorkloadLock, deliver,
};
use crate::types::{AttemptId, BuildId, ImageRef, WorkloadKey};

/// Where the target image of a deployment comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Resolve through the registry, pinning to a digest.
    Build(BuildId),
    /// Use this reference as given.
    Image(ImageRef),
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub workload: Workload,
    pub source: ImageSource,
    /// Override the configured rollback-on-stall policy.
    pub rollback: Option<bool>,
    /// Break a held lock and discard an unfinished checkpoint.
    pub force: bool,
}

impl DeployRequest {
    pub fn new(workload: Workload, source: ImageSource) -> Self {
        Self {
            workload,
            source,
            rollback: None,
            force: false,
        }
    }
}

/// The terminal outcome of one request plus anything worth warning about.
#[derive(Debug)]
pub struct DeployReport {
    pub outcome: Outcome,
    pub diagnostics: Diagnostics,
}

/// Releases an in-process workload claim on drop.
struct Claim {
    active: Arc<Mutex<HashSet<WorkloadKey>>>,
    key: WorkloadKey,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}

pub struct Coordinator<C, R> {
    cluster: C,
    resolver: ImageResolver<R>,
    settings: RolloutSettings,
    store: Option<AttemptStore>,
    audit: Arc<dyn AuditSink>,
    active: Arc<Mutex<HashSet<WorkloadKey>>>,
    cancels: Mutex<HashMap<WorkloadKey, (AttemptId, watch::Sender<bool>)>>,
}

impl<C: ClusterOps, R: RegistryOps> Coordinator<C, R> {
    pub fn new(cluster: C, resolver: ImageResolver<R>, settings: RolloutSettings) -> Self {
        Self {
            cluster,
            resolver,
            settings,
            store: None,
            audit: Arc::new(MemoryAuditLog::new()),
            active: Arc::new(Mutex::new(HashSet::new())),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Persist checkpoints and locks under `store`, auditing to its log.
    /// Call `with_audit` afterwards to audit elsewhere.
    pub fn with_store(mut self, store: AttemptStore) -> Self {
        self.audit = Arc::new(store.audit_log());
        self.store = Some(store);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn store(&self) -> Option<&AttemptStore> {
        self.store.as_ref()
    }

    /// Run one deployment to a terminal state.
    ///
    /// Fails with `RolloutError::Conflict` while another attempt for the
    /// same workload is active, leaving that attempt untouched.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployReport> {
        let key = request.workload.key.clone();
        let _claim = self.claim(&key)?;
        let lock = self.lock(&key, request.force)?;

        if let Some(store) = &self.store
            && let Some(unfinished) = store.load(&key)?
        {
            if !request.force {
                return Err(RolloutError::Conflict {
                    workload: key,
                    holder: format!(
                        "unfinished attempt {}; resume it or pass --force",
                        unfinished.attempt.id()
                    ),
                }
                .into());
            }
            tracing::warn!(workload = %key, attempt = %unfinished.attempt.id(), "discarding unfinished attempt");
            store.clear(&key)?;
        }

        let (target, build) = match &request.source {
            ImageSource::Build(build) => (self.resolver.resolve(build).await?, Some(build.clone())),
            ImageSource::Image(image) => (image.clone(), None),
        };
        let previous = self.previous_image(&request.workload, &target).await;

        let attempt = RolloutAttempt::new(key.clone(), target, previous, build);
        let workload = request.workload;
        let rollout = Rollout::new(workload.clone(), attempt);
        let allow_rollback = request.rollback.unwrap_or(self.settings.rollback);

        let outcome = self
            .run(Rehydrated::Pending(rollout), allow_rollback, lock.as_ref())
            .await;
        let diagnostics = self.finish(&workload, &outcome, lock).await;
        Ok(DeployReport {
            outcome,
            diagnostics,
        })
    }

    /// Deploy distinct workloads concurrently. Results follow request order.
    pub async fn deploy_all(&self, requests: Vec<DeployRequest>) -> Vec<Result<DeployReport>> {
        join_all(requests.into_iter().map(|request| self.deploy(request))).await
    }

    /// Continue the persisted attempt for `key` from its recorded phase.
    ///
    /// A checkpoint already in a terminal phase only had its audit delivery
    /// fail; it is delivered again and cleared.
    pub async fn resume(&self, key: &WorkloadKey, force: bool) -> Result<DeployReport> {
        let _claim = self.claim(key)?;
        let lock = self.lock(key, force)?;
        let checkpoint = self
            .store
            .as_ref()
            .map(|store| store.load(key))
            .transpose()?
            .flatten()
            .ok_or_else(|| Error::NoAttempt(key.to_string()))?;

        let workload = checkpoint.workload.clone();
        if checkpoint.attempt.phase().is_terminal() {
            let outcome = terminal_outcome(checkpoint);
            let diagnostics = self.finish(&workload, &outcome, lock).await;
            return Ok(DeployReport {
                outcome,
                diagnostics,
            });
        }

        tracing::info!(workload = %key, attempt = %checkpoint.attempt.id(), phase = %checkpoint.attempt.phase(), "resuming");
        let allow_rollback = checkpoint.allow_rollback;
        let rehydrated = checkpoint.rehydrate()?;
        let outcome = self.run(rehydrated, allow_rollback, lock.as_ref()).await;
        let diagnostics = self.finish(&workload, &outcome, lock).await;
        Ok(DeployReport {
            outcome,
            diagnostics,
        })
    }

    /// Ask the active attempt for `key` to stop. Works across processes
    /// when a store is configured. Returns the cancelled attempt's id.
    pub fn cancel(&self, key: &WorkloadKey) -> Result<AttemptId> {
        if let Some((id, tx)) = self.cancels.lock().get(key) {
            let _ = tx.send(true);
            tracing::info!(workload = %key, attempt = %id, "cancel requested");
            return Ok(id.clone());
        }

        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::NoAttempt(key.to_string()))?;
        let checkpoint = store
            .load(key)?
            .ok_or_else(|| Error::NoAttempt(key.to_string()))?;
        let id = checkpoint.attempt.id().clone();
        store.request_cancel(&id)?;
        tracing::info!(workload = %key, attempt = %id, "cancel requested");
        Ok(id)
    }

    /// Signal every attempt running in this process. Rollbacks already
    /// under way continue. Returns how many attempts were signalled.
    pub fn cancel_all(&self) -> usize {
        let cancels = self.cancels.lock();
        for (key, (id, tx)) in cancels.iter() {
            let _ = tx.send(true);
            tracing::info!(workload = %key, attempt = %id, "cancel requested");
        }
        cancels.len()
    }

    fn claim(&self, key: &WorkloadKey) -> Result<Claim> {
        if !self.active.lock().insert(key.clone()) {
            return Err(RolloutError::Conflict {
                workload: key.clone(),
                holder: "an active attempt in this process".to_string(),
            }
            .into());
        }
        Ok(Claim {
            active: Arc::clone(&self.active),
            key: key.clone(),
        })
    }

    fn lock(&self, key: &WorkloadKey, force: bool) -> Result<Option<WorkloadLock>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.lock(key, force) {
            Ok(lock) => Ok(Some(lock)),
            Err(StoreError::Locked {
                holder,
                pid,
                started_at,
                ..
            }) => Err(RolloutError::Conflict {
                workload: key.clone(),
                holder: format!("{} (pid {}) since {}", holder, pid, started_at),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    /// The rollback target: the workload's recorded image, else what most
    /// replicas run right now.
    async fn previous_image(&self, workload: &Workload, target: &ImageRef) -> Option<ImageRef> {
        if let Some(current) = &workload.current_image {
            return Some(current.clone());
        }
        match observe_with_timeout(&self.cluster, workload, self.settings.observe_timeout).await {
            Ok(observation) => observation.dominant_image(Some(target)),
            Err(e) => {
                tracing::debug!(workload = %workload.key, error = %e, "no previous image observed");
                None
            }
        }
    }

    /// Execute `rehydrated`, refreshing `lock` while it runs.
    async fn run(
        &self,
        rehydrated: Rehydrated,
        allow_rollback: bool,
        lock: Option<&WorkloadLock>,
    ) -> Outcome {
        let key = rehydrated.workload().key.clone();
        let id = rehydrated.attempt().id().clone();
        let (tx, rx) = watch::channel(false);
        self.cancels.lock().insert(key.clone(), (id, tx));

        let mut ctx = ExecContext::new(&self.cluster, &self.settings)
            .with_rollback(allow_rollback)
            .with_cancel(rx);
        if let Some(store) = &self.store {
            ctx = ctx.with_store(store);
        }

        let execute = rehydrated.execute(&ctx);
        tokio::pin!(execute);
        let mut refresh =
            tokio::time::interval_at(tokio::time::Instant::now() + REFRESH_EVERY, REFRESH_EVERY);
        let outcome = loop {
            tokio::select! {
                outcome = &mut execute => break outcome,
                _ = refresh.tick() => {
                    if let Some(lock) = lock
                        && let Err(e) = lock.refresh()
                    {
                        tracing::warn!(workload = %key, error = %e, "failed to refresh workload lock");
                    }
                }
            }
        };
        self.cancels.lock().remove(&key);
        outcome
    }

    /// Audit every sealed record, then drop the checkpoint and release the
    /// lock. A record that cannot be audited keeps its checkpoint.
    async fn finish(
        &self,
        workload: &Workload,
        outcome: &Outcome,
        lock: Option<WorkloadLock>,
    ) -> Diagnostics {
        let mut diag = Diagnostics::default();
        let mut delivered = true;

        for record in outcome.records() {
            if let Err(e) = deliver(
                self.audit.as_ref(),
                record,
                self.settings.audit_retries,
                self.settings.backoff_base,
            )
            .await
            {
                delivered = false;
                diag.warn(
                    WarningKind::AuditDelivery,
                    format!("failed to audit attempt {}: {}", record.id(), e),
                );
            }
        }

        if let Some(store) = &self.store {
            let cleanup = if delivered {
                store.clear(&workload.key)
            } else {
                store.save(&Checkpoint::new(
                    workload,
                    outcome.attempt(),
                    outcome.rollback().map(|r| &**r),
                ))
            };
            if let Err(e) = cleanup {
                diag.warn(
                    WarningKind::Checkpoint,
                    format!("failed to update checkpoint for {}: {}", workload.key, e),
                );
            }
            for record in outcome.records() {
                if let Err(e) = store.clear_cancel(record.id()) {
                    diag.warn(
                        WarningKind::CancelMarker,
                        format!("failed to remove cancel marker for {}: {}", record.id(), e),
                    );
                }
            }
        }

        if let Some(lock) = lock
            && let Err(e) = lock.release()
        {
            diag.warn(
                WarningKind::LockRelease,
                format!("failed to release lock for {}: {}", workload.key, e),
            );
        }

        tracing::info!(workload = %workload.key, attempt = %outcome.attempt().id(), phase = %outcome.phase(), "attempt finished");
        diag
    }
}

/// Rebuild the outcome of a checkpoint saved after its attempt ended.
fn terminal_outcome(checkpoint: Checkpoint) -> Outcome {
    let Checkpoint {
        attempt, rollback, ..
    } = checkpoint;
    match (attempt.phase(), rollback) {
        (AttemptPhase::Succeeded, _) => Outcome::Succeeded(attempt.seal()),
        (AttemptPhase::RolledBack, Some(rollback)) => Outcome::RolledBack {
            attempt: attempt.seal(),
            rollback: rollback.seal(),
        },
        (_, rollback) => Outcome::Failed {
            attempt: attempt.seal(),
            rollback: rollback.map(RolloutAttempt::seal),
        },
    }
}
