// ABOUTME: The control loop shared by rollouts and rollbacks: observe, plan, apply one step, wait.
// ABOUTME: Applies carry a timeout and bounded retries; every request attempt lands in the step log.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;

use super::attempt::RolloutAttempt;
use super::error::RolloutError;
use super::machine::Checkpoint;
use super::planner::{self, Plan};
use super::stall::{StallDetector, StallVerdict};
use super::step::{RolloutStep, StepOutcome, StepRecord};
use super::workload::Workload;
use crate::cluster::{ClusterError, ClusterOps, observe_with_timeout};
use crate::config::RolloutSettings;
use crate::store::AttemptStore;
use crate::types::AttemptId;

/// What a rollout needs from its surroundings.
pub struct ExecContext<'a, C: ?Sized> {
    pub cluster: &'a C,
    pub settings: &'a RolloutSettings,
    /// Roll back on stall. Starts from `settings.rollback`.
    pub allow_rollback: bool,
    pub store: Option<&'a AttemptStore>,
    pub cancel: Option<watch::Receiver<bool>>,
}

impl<'a, C: ClusterOps + ?Sized> ExecContext<'a, C> {
    pub fn new(cluster: &'a C, settings: &'a RolloutSettings) -> Self {
        Self {
            cluster,
            settings,
            allow_rollback: settings.rollback,
            store: None,
            cancel: None,
        }
    }

    pub fn with_store(mut self, store: &'a AttemptStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_rollback(mut self, allow: bool) -> Self {
        self.allow_rollback = allow;
        self
    }

    fn is_cancelled(&self, attempt: &AttemptId) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
            || self.store.is_some_and(|s| s.cancel_requested(attempt))
    }

    /// Persist the attempt (and its active rollback). Failures are logged;
    /// the cluster is the source of truth and the next save catches up.
    pub(crate) fn checkpoint(
        &self,
        workload: &Workload,
        attempt: &RolloutAttempt,
        rollback: Option<&RolloutAttempt>,
    ) {
        let Some(store) = self.store else {
            return;
        };
        let checkpoint =
            Checkpoint::new(workload, attempt, rollback).with_rollback_allowed(self.allow_rollback);
        if let Err(e) = store.save(&checkpoint) {
            tracing::warn!(workload = %workload.key, attempt = %attempt.id(), error = %e, "failed to persist checkpoint");
        }
    }
}

/// How one drive toward a target ended. `Stalled` always carries
/// `RolloutError::StallTimeout`.
#[derive(Debug)]
pub(crate) enum Drive {
    Converged,
    Stalled(RolloutError),
    Failed(RolloutError),
}

fn stalled(reason: impl Into<String>) -> Drive {
    Drive::Stalled(RolloutError::StallTimeout(reason.into()))
}

/// Drives one attempt toward its target. `parent` is set while driving a
/// rollback so checkpoints keep both records together.
pub(crate) struct Driver<'r, 'a, C: ?Sized> {
    ctx: &'r ExecContext<'a, C>,
    workload: &'r Workload,
    parent: Option<&'r RolloutAttempt>,
}

impl<'r, 'a, C: ClusterOps + ?Sized> Driver<'r, 'a, C> {
    pub(crate) fn new(
        ctx: &'r ExecContext<'a, C>,
        workload: &'r Workload,
        parent: Option<&'r RolloutAttempt>,
    ) -> Self {
        Self {
            ctx,
            workload,
            parent,
        }
    }

    pub(crate) async fn drive(&self, attempt: &mut RolloutAttempt, cancellable: bool) -> Drive {
        let target = attempt.target().clone();
        let settings = self.ctx.settings;
        let mut detector = StallDetector::new(
            settings.stall_after_polls,
            self.workload.strategy.readiness_timeout,
        );
        let mut cancel = if cancellable {
            self.ctx.cancel.clone()
        } else {
            None
        };

        loop {
            if cancellable && self.ctx.is_cancelled(attempt.id()) {
                tracing::info!(workload = %self.workload.key, attempt = %attempt.id(), "cancellation requested");
                return stalled("cancelled by operator");
            }

            match observe_with_timeout(self.ctx.cluster, self.workload, settings.observe_timeout)
                .await
            {
                Ok(observation) => {
                    let counts = observation.counts(&target);
                    tracing::debug!(
                        workload = %self.workload.key,
                        attempt = %attempt.id(),
                        total = counts.total,
                        updated = counts.updated,
                        updated_ready = counts.updated_ready,
                        outdated = counts.outdated,
                        "observed"
                    );
                    if counts.is_converged() {
                        return Drive::Converged;
                    }
                    if let StallVerdict::Stalled(reason) = detector.observe(&counts) {
                        return stalled(reason);
                    }

                    match planner::plan(self.workload, &observation, &target) {
                        Plan::Converged => return Drive::Converged,
                        Plan::Blocked(reason) => {
                            tracing::debug!(workload = %self.workload.key, ?reason, "waiting");
                        }
                        Plan::Steps(steps) => {
                            if let Some(step) = steps.first()
                                && let Err(e) = self.apply(attempt, step).await
                            {
                                return Drive::Failed(e);
                            }
                        }
                    }
                }
                Err(err) => {
                    let err = RolloutError::from(err);
                    if !err.is_retryable() {
                        return Drive::Failed(err);
                    }
                    tracing::warn!(workload = %self.workload.key, error = %err, "observation failed");
                    if let StallVerdict::Stalled(reason) = detector.observe_failure() {
                        return stalled(format!("{}; last error: {}", reason, err.cause()));
                    }
                }
            }

            pause(&mut cancel, settings.poll_interval).await;
        }
    }

    /// Issue `step`, retrying timeouts with backoff. Exactly one request is
    /// outstanding at any time.
    async fn apply(
        &self,
        attempt: &mut RolloutAttempt,
        step: &RolloutStep,
    ) -> Result<(), RolloutError> {
        let settings = self.ctx.settings;
        let sequence = attempt.step_count() + 1;
        let tries = settings.mutation_retries + 1;
        let mut last_reason = String::new();

        for try_number in 1..=tries {
            let requested_at = Utc::now();
            let result = tokio::time::timeout(
                settings.apply_timeout,
                self.ctx.cluster.apply(self.workload, step),
            )
            .await
            .unwrap_or(Err(ClusterError::TimedOut(settings.apply_timeout)));

            let (outcome, fatal) = match result {
                Ok(()) => (StepOutcome::Accepted, None),
                Err(ClusterError::Rejected(reason)) => (
                    StepOutcome::Rejected {
                        reason: reason.clone(),
                    },
                    Some(RolloutError::AdmissionRejected(reason)),
                ),
                Err(err @ ClusterError::WorkloadNotFound(_)) => (
                    StepOutcome::Rejected {
                        reason: err.to_string(),
                    },
                    Some(err.into()),
                ),
                Err(err) => (
                    StepOutcome::TimedOut {
                        reason: err.to_string(),
                    },
                    None,
                ),
            };

            attempt.record_step(StepRecord {
                sequence,
                try_number,
                step: step.clone(),
                requested_at,
                finished_at: Utc::now(),
                outcome: outcome.clone(),
            });
            self.checkpoint(attempt);

            match (outcome, fatal) {
                (StepOutcome::Accepted, _) => {
                    tracing::info!(workload = %self.workload.key, attempt = %attempt.id(), step = %step, "step accepted");
                    return Ok(());
                }
                (_, Some(err)) => {
                    tracing::warn!(workload = %self.workload.key, attempt = %attempt.id(), step = %step, error = %err, "step rejected");
                    return Err(err);
                }
                (StepOutcome::Rejected { reason }, None) | (StepOutcome::TimedOut { reason }, None) => {
                    tracing::warn!(workload = %self.workload.key, step = %step, try_number, reason = %reason, "step timed out");
                    last_reason = reason;
                    if try_number < tries {
                        tokio::time::sleep(settings.backoff(try_number)).await;
                    }
                }
            }
        }

        Err(RolloutError::TransientCluster(format!(
            "{} gave up after {} tries: {}",
            step, tries, last_reason
        )))
    }

    fn checkpoint(&self, attempt: &RolloutAttempt) {
        match self.parent {
            Some(parent) => self.ctx.checkpoint(self.workload, parent, Some(attempt)),
            None => self.ctx.checkpoint(self.workload, attempt, None),
        }
    }
}

/// Sleep for `duration`, waking early when cancellation is signalled.
async fn pause(cancel: &mut Option<watch::Receiver<bool>>, duration: Duration) {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    let Some(rx) = cancel.as_mut() else {
        sleep.await;
        return;
    };

    let closed = tokio::select! {
        _ = &mut sleep => return,
        changed = rx.changed() => changed.is_err(),
    };

    if closed {
        // Sender gone: nobody can cancel any more.
        *cancel = None;
        sleep.await;
    }
}
