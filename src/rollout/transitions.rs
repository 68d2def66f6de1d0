// ABOUTME: State transition methods for rollouts.
// ABOUTME: Each method consumes self and returns the possible next states.

use super::attempt::AttemptPhase;
use super::executor::{Drive, Driver, ExecContext};
use super::machine::{Outcome, Rollout};
use super::rollback::RollbackController;
use super::state::{Failed, Pending, Progressing, RolledBack, RollingBack, Stalled, Succeeded};
use crate::cluster::{ClusterError, ClusterOps, observe_with_timeout};

/// Result of `Rollout<Pending>::begin`.
#[derive(Debug)]
pub enum Started {
    /// The workload already runs the target; nothing was applied.
    Converged(Rollout<Succeeded>),
    Progressing(Rollout<Progressing>),
    Failed(Rollout<Failed>),
}

/// Result of `Rollout<Progressing>::run`.
#[derive(Debug)]
pub enum Advanced {
    Succeeded(Rollout<Succeeded>),
    Stalled(Rollout<Stalled>),
    Failed(Rollout<Failed>),
}

/// Result of `Rollout<Stalled>::recover`.
#[derive(Debug)]
pub enum Recovered {
    RollingBack(Rollout<RollingBack>),
    Failed(Rollout<Failed>),
}

/// Result of `Rollout<RollingBack>::run`.
pub type RollbackResult = Result<Rollout<RolledBack>, Rollout<Failed>>;

// =============================================================================
// Pending -> Succeeded | Progressing | Failed
// =============================================================================

impl Rollout<Pending> {
    /// Take the first observation. A workload already on the target
    /// succeeds without any step being applied.
    pub async fn begin<C: ClusterOps + ?Sized>(mut self, ctx: &ExecContext<'_, C>) -> Started {
        tracing::info!(
            workload = %self.workload.key,
            attempt = %self.attempt.id(),
            target = %self.attempt.target(),
            previous = ?self.attempt.previous().map(ToString::to_string),
            "rollout started"
        );

        let target = self.attempt.target().clone();
        match observe_with_timeout(ctx.cluster, &self.workload, ctx.settings.observe_timeout).await
        {
            Ok(observation) if observation.counts(&target).is_converged() => {
                self.attempt.enter(
                    AttemptPhase::Succeeded,
                    Some("workload already runs the target image".to_string()),
                );
                Started::Converged(self.into_state(Succeeded))
            }
            Err(err @ (ClusterError::WorkloadNotFound(_) | ClusterError::Rejected(_))) => {
                self.attempt
                    .enter(AttemptPhase::Failed, Some(err.to_string()));
                Started::Failed(self.into_state(Failed::default()))
            }
            // A transient error here is the first no-progress poll of the loop.
            Ok(_) | Err(_) => {
                self.attempt.enter(AttemptPhase::Progressing, None);
                ctx.checkpoint(&self.workload, &self.attempt, None);
                Started::Progressing(self.into_state(Progressing))
            }
        }
    }

    /// Run to a terminal state.
    pub async fn execute<C: ClusterOps + ?Sized>(self, ctx: &ExecContext<'_, C>) -> Outcome {
        match self.begin(ctx).await {
            Started::Converged(rollout) => rollout.into(),
            Started::Progressing(rollout) => rollout.execute(ctx).await,
            Started::Failed(rollout) => rollout.into(),
        }
    }
}

// =============================================================================
// Progressing -> Succeeded | Stalled | Failed
// =============================================================================

impl Rollout<Progressing> {
    pub async fn run<C: ClusterOps + ?Sized>(mut self, ctx: &ExecContext<'_, C>) -> Advanced {
        let driver = Driver::new(ctx, &self.workload, None);
        let drive = driver.drive(&mut self.attempt, true).await;

        match drive {
            Drive::Converged => {
                let reason = format!(
                    "{} replicas ready on {}",
                    self.workload.desired,
                    self.attempt.target()
                );
                self.attempt.enter(AttemptPhase::Succeeded, Some(reason));
                tracing::info!(workload = %self.workload.key, attempt = %self.attempt.id(), "rollout succeeded");
                Advanced::Succeeded(self.into_state(Succeeded))
            }
            Drive::Stalled(stall) => {
                let reason = stall.cause();
                self.attempt
                    .enter(AttemptPhase::Stalled, Some(reason.clone()));
                ctx.checkpoint(&self.workload, &self.attempt, None);
                tracing::warn!(workload = %self.workload.key, attempt = %self.attempt.id(), reason = %reason, "rollout stalled");
                Advanced::Stalled(self.into_state(Stalled { reason }))
            }
            Drive::Failed(err) => {
                self.attempt
                    .enter(AttemptPhase::Failed, Some(err.to_string()));
                tracing::error!(workload = %self.workload.key, attempt = %self.attempt.id(), error = %err, "rollout failed");
                Advanced::Failed(self.into_state(Failed::default()))
            }
        }
    }

    pub async fn execute<C: ClusterOps + ?Sized>(self, ctx: &ExecContext<'_, C>) -> Outcome {
        match self.run(ctx).await {
            Advanced::Succeeded(rollout) => rollout.into(),
            Advanced::Stalled(rollout) => rollout.execute(ctx).await,
            Advanced::Failed(rollout) => rollout.into(),
        }
    }
}

// =============================================================================
// Stalled -> RollingBack | Failed
// =============================================================================

impl Rollout<Stalled> {
    pub fn recover<C: ClusterOps + ?Sized>(mut self, ctx: &ExecContext<'_, C>) -> Recovered {
        let stall = self.state.reason.clone();

        if !ctx.allow_rollback {
            self.attempt.enter(
                AttemptPhase::Failed,
                Some(format!("{}; rollback disabled", stall)),
            );
            return Recovered::Failed(self.into_state(Failed::default()));
        }

        match RollbackController::initiate(&self.attempt) {
            Ok(rollback) => {
                self.attempt.link_rollback(rollback.id());
                self.attempt.enter(
                    AttemptPhase::RollingBack,
                    Some(format!("{}; rolling back to {}", stall, rollback.target())),
                );
                ctx.checkpoint(&self.workload, &self.attempt, Some(&rollback));
                Recovered::RollingBack(self.into_state(RollingBack { rollback }))
            }
            Err(refusal) => {
                self.attempt
                    .enter(AttemptPhase::Failed, Some(format!("{}; {}", stall, refusal)));
                tracing::error!(workload = %self.workload.key, attempt = %self.attempt.id(), reason = %refusal, "cannot roll back");
                Recovered::Failed(self.into_state(Failed::default()))
            }
        }
    }

    pub async fn execute<C: ClusterOps + ?Sized>(self, ctx: &ExecContext<'_, C>) -> Outcome {
        match self.recover(ctx) {
            Recovered::RollingBack(rollout) => rollout.execute(ctx).await,
            Recovered::Failed(rollout) => rollout.into(),
        }
    }
}

// =============================================================================
// RollingBack -> RolledBack | Failed
// =============================================================================

impl Rollout<RollingBack> {
    /// Drive the rollback attempt to the previous image. Cancellation is not
    /// honoured here; an interrupted rollback leaves the workload mixed.
    pub async fn run<C: ClusterOps + ?Sized>(self, ctx: &ExecContext<'_, C>) -> RollbackResult {
        let Rollout {
            mut attempt,
            workload,
            state: RollingBack { mut rollback },
        } = self;

        if rollback.phase() == AttemptPhase::Pending {
            rollback.enter(AttemptPhase::Progressing, None);
            ctx.checkpoint(&workload, &attempt, Some(&rollback));
        }

        let drive = Driver::new(ctx, &workload, Some(&attempt))
            .drive(&mut rollback, false)
            .await;

        let stall = attempt.reason().unwrap_or("stalled").to_string();
        let restored = rollback.target().clone();
        match drive {
            Drive::Converged => {
                rollback.enter(
                    AttemptPhase::Succeeded,
                    Some(format!("{} restored", restored)),
                );
                attempt.enter(
                    AttemptPhase::RolledBack,
                    Some(format!("{}; rolled back to {}", stall, restored)),
                );
                tracing::info!(workload = %workload.key, attempt = %attempt.id(), image = %restored, "rolled back");
                Ok(Rollout {
                    attempt,
                    workload,
                    state: RolledBack {
                        rollback: rollback.seal(),
                    },
                })
            }
            Drive::Stalled(rollback_stall) => {
                let reason = rollback_stall.cause();
                rollback.enter(AttemptPhase::Failed, Some(reason.clone()));
                attempt.enter(
                    AttemptPhase::Failed,
                    Some(format!("{}; rollback stalled: {}", stall, reason)),
                );
                tracing::error!(workload = %workload.key, attempt = %attempt.id(), reason = %reason, "rollback stalled, operator intervention required");
                Err(Rollout {
                    attempt,
                    workload,
                    state: Failed {
                        rollback: Some(rollback.seal()),
                    },
                })
            }
            Drive::Failed(err) => {
                rollback.enter(AttemptPhase::Failed, Some(err.to_string()));
                attempt.enter(
                    AttemptPhase::Failed,
                    Some(format!("{}; rollback failed: {}", stall, err)),
                );
                tracing::error!(workload = %workload.key, attempt = %attempt.id(), error = %err, "rollback failed, operator intervention required");
                Err(Rollout {
                    attempt,
                    workload,
                    state: Failed {
                        rollback: Some(rollback.seal()),
                    },
                })
            }
        }
    }

    pub async fn execute<C: ClusterOps + ?Sized>(self, ctx: &ExecContext<'_, C>) -> Outcome {
        match self.run(ctx).await {
            Ok(rollout) => rollout.into(),
            Err(rollout) => rollout.into(),
        }
    }
}

impl super::machine::Rehydrated {
    /// Continue a rehydrated rollout to a terminal state.
    pub async fn execute<C: ClusterOps + ?Sized>(self, ctx: &ExecContext<'_, C>) -> Outcome {
        use super::machine::Rehydrated;
        match self {
            Rehydrated::Pending(rollout) => rollout.execute(ctx).await,
            Rehydrated::Progressing(rollout) => rollout.execute(ctx).await,
            Rehydrated::Stalled(rollout) => rollout.execute(ctx).await,
            Rehydrated::RollingBack(rollout) => rollout.execute(ctx).await,
        }
    }
}
