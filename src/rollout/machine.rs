// ABOUTME: Generic rollout struct parameterized by state marker, plus checkpoints and outcomes.
// ABOUTME: Checkpoints rehydrate into the typed state the attempt was persisted in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::{AttemptPhase, RolloutAttempt, SealedAttempt};
use super::error::RolloutError;
use super::state::{Failed, Pending, Progressing, RolledBack, RollingBack, Stalled, Succeeded};
use super::workload::Workload;
use crate::types::{AttemptId, ImageRef, WorkloadKey};

/// A rollout in progress, parameterized by its current state.
///
/// The attempt record carries the serialisable phase; the type parameter
/// decides which transitions are callable. A `Rollout<Succeeded>` has no
/// `recover()`, so a succeeded rollout cannot be rolled back.
#[derive(Debug)]
pub struct Rollout<S> {
    pub(crate) attempt: RolloutAttempt,
    pub(crate) workload: Workload,
    pub(crate) state: S,
}

impl Rollout<Pending> {
    pub fn new(workload: Workload, attempt: RolloutAttempt) -> Self {
        Rollout {
            attempt,
            workload,
            state: Pending,
        }
    }
}

impl<S> Rollout<S> {
    pub fn attempt(&self) -> &RolloutAttempt {
        &self.attempt
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    pub fn id(&self) -> &AttemptId {
        self.attempt.id()
    }

    pub fn target(&self) -> &ImageRef {
        self.attempt.target()
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub(crate) fn into_state<T>(self, state: T) -> Rollout<T> {
        Rollout {
            attempt: self.attempt,
            workload: self.workload,
            state,
        }
    }
}

impl Rollout<Succeeded> {
    pub fn seal(self) -> SealedAttempt {
        self.attempt.seal()
    }
}

impl Rollout<RolledBack> {
    /// The original attempt and the rollback attempt that reverted it.
    pub fn seal(self) -> (SealedAttempt, SealedAttempt) {
        (self.attempt.seal(), self.state.rollback)
    }
}

impl Rollout<Failed> {
    pub fn seal(self) -> (SealedAttempt, Option<SealedAttempt>) {
        (self.attempt.seal(), self.state.rollback)
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// How a rollout ended, with every sealed record it produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeeded(SealedAttempt),
    RolledBack {
        attempt: SealedAttempt,
        rollback: SealedAttempt,
    },
    Failed {
        attempt: SealedAttempt,
        rollback: Option<SealedAttempt>,
    },
}

impl Outcome {
    pub fn attempt(&self) -> &SealedAttempt {
        match self {
            Outcome::Succeeded(attempt)
            | Outcome::RolledBack { attempt, .. }
            | Outcome::Failed { attempt, .. } => attempt,
        }
    }

    pub fn rollback(&self) -> Option<&SealedAttempt> {
        match self {
            Outcome::Succeeded(_) => None,
            Outcome::RolledBack { rollback, .. } => Some(rollback),
            Outcome::Failed { rollback, .. } => rollback.as_ref(),
        }
    }

    pub fn phase(&self) -> AttemptPhase {
        self.attempt().phase()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    /// Records in the order they should be audited: rollback last.
    pub fn records(&self) -> Vec<&SealedAttempt> {
        let mut records = vec![self.attempt()];
        records.extend(self.rollback());
        records
    }
}

impl From<Rollout<Succeeded>> for Outcome {
    fn from(rollout: Rollout<Succeeded>) -> Self {
        Outcome::Succeeded(rollout.seal())
    }
}

impl From<Rollout<RolledBack>> for Outcome {
    fn from(rollout: Rollout<RolledBack>) -> Self {
        let (attempt, rollback) = rollout.seal();
        Outcome::RolledBack { attempt, rollback }
    }
}

impl From<Rollout<Failed>> for Outcome {
    fn from(rollout: Rollout<Failed>) -> Self {
        let (attempt, rollback) = rollout.seal();
        Outcome::Failed { attempt, rollback }
    }
}

// =============================================================================
// Checkpoints
// =============================================================================

/// Everything needed to continue an attempt in another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workload: Workload,
    pub attempt: RolloutAttempt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RolloutAttempt>,
    /// Rollback policy the attempt was started with; a resumed attempt keeps it.
    #[serde(default = "rollback_allowed")]
    pub allow_rollback: bool,
    pub saved_at: DateTime<Utc>,
}

fn rollback_allowed() -> bool {
    true
}

impl Checkpoint {
    pub fn new(
        workload: &Workload,
        attempt: &RolloutAttempt,
        rollback: Option<&RolloutAttempt>,
    ) -> Self {
        Self {
            workload: workload.clone(),
            attempt: attempt.clone(),
            rollback: rollback.cloned(),
            allow_rollback: rollback_allowed(),
            saved_at: Utc::now(),
        }
    }

    pub fn with_rollback_allowed(mut self, allow: bool) -> Self {
        self.allow_rollback = allow;
        self
    }

    pub fn key(&self) -> &WorkloadKey {
        &self.workload.key
    }

    /// Rebuild the typed rollout for the persisted phase.
    pub fn rehydrate(self) -> Result<Rehydrated, RolloutError> {
        let Checkpoint {
            workload,
            attempt,
            rollback,
            ..
        } = self;

        let phase = attempt.phase();
        let rollout = Rollout::new(workload, attempt);
        match (phase, rollback) {
            (AttemptPhase::Pending, _) => Ok(Rehydrated::Pending(rollout)),
            (AttemptPhase::Progressing, _) => Ok(Rehydrated::Progressing(
                rollout.into_state(Progressing),
            )),
            (AttemptPhase::RollingBack, Some(rollback)) if !rollback.phase().is_terminal() => Ok(
                Rehydrated::RollingBack(rollout.into_state(RollingBack { rollback })),
            ),
            // A rollback that never got going, or one already finished but not
            // reflected on the original: decide again from Stalled.
            (AttemptPhase::Stalled | AttemptPhase::RollingBack, _) => {
                let reason = rollout
                    .attempt
                    .reason()
                    .unwrap_or("stalled before restart")
                    .to_string();
                Ok(Rehydrated::Stalled(rollout.into_state(Stalled { reason })))
            }
            (phase, _) => Err(RolloutError::Configuration(format!(
                "attempt {} already finished ({})",
                rollout.attempt.id(),
                phase
            ))),
        }
    }
}

/// A rollout rebuilt from a checkpoint in whichever state it was saved.
#[derive(Debug)]
pub enum Rehydrated {
    Pending(Rollout<Pending>),
    Progressing(Rollout<Progressing>),
    Stalled(Rollout<Stalled>),
    RollingBack(Rollout<RollingBack>),
}

impl Rehydrated {
    pub fn attempt(&self) -> &RolloutAttempt {
        match self {
            Rehydrated::Pending(r) => r.attempt(),
            Rehydrated::Progressing(r) => r.attempt(),
            Rehydrated::Stalled(r) => r.attempt(),
            Rehydrated::RollingBack(r) => r.attempt(),
        }
    }

    pub fn workload(&self) -> &Workload {
        match self {
            Rehydrated::Pending(r) => r.workload(),
            Rehydrated::Progressing(r) => r.workload(),
            Rehydrated::Stalled(r) => r.workload(),
            Rehydrated::RollingBack(r) => r.workload(),
        }
    }
}
