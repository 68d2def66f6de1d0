// ABOUTME: The persisted record of one rollout attempt: target, rollback target, phases, step log.
// ABOUTME: Records are append-only while active and become immutable once sealed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

use super::step::StepRecord;
use crate::types::{AttemptId, BuildId, ImageRef, WorkloadKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Pending,
    Progressing,
    Stalled,
    RollingBack,
    Succeeded,
    RolledBack,
    Failed,
}

impl AttemptPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptPhase::Succeeded | AttemptPhase::RolledBack | AttemptPhase::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptPhase::Pending => "pending",
            AttemptPhase::Progressing => "progressing",
            AttemptPhase::Stalled => "stalled",
            AttemptPhase::RollingBack => "rolling_back",
            AttemptPhase::Succeeded => "succeeded",
            AttemptPhase::RolledBack => "rolled_back",
            AttemptPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: AttemptPhase,
    pub to: AttemptPhase,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutAttempt {
    id: AttemptId,
    workload: WorkloadKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build: Option<BuildId>,
    target: ImageRef,
    previous: Option<ImageRef>,
    started_at: DateTime<Utc>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
    phase: AttemptPhase,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rollback_of: Option<AttemptId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rollback_attempt: Option<AttemptId>,
    #[serde(default)]
    transitions: Vec<PhaseTransition>,
    #[serde(default)]
    steps: Vec<StepRecord>,
}

impl RolloutAttempt {
    pub fn new(
        workload: WorkloadKey,
        target: ImageRef,
        previous: Option<ImageRef>,
        build: Option<BuildId>,
    ) -> Self {
        Self {
            id: AttemptId::generate(),
            workload,
            build,
            target,
            previous,
            started_at: Utc::now(),
            finished_at: None,
            phase: AttemptPhase::Pending,
            reason: None,
            rollback_of: None,
            rollback_attempt: None,
            transitions: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// A rollback attempt reverting `original`; it targets the original's
    /// previous image and remembers the image it replaces.
    pub(crate) fn rollback_for(original: &RolloutAttempt, target: ImageRef) -> Self {
        let mut attempt = Self::new(
            original.workload.clone(),
            target,
            Some(original.target.clone()),
            None,
        );
        attempt.rollback_of = Some(original.id.clone());
        attempt
    }

    pub fn id(&self) -> &AttemptId {
        &self.id
    }

    pub fn workload(&self) -> &WorkloadKey {
        &self.workload
    }

    pub fn build(&self) -> Option<&BuildId> {
        self.build.as_ref()
    }

    pub fn target(&self) -> &ImageRef {
        &self.target
    }

    pub fn previous(&self) -> Option<&ImageRef> {
        self.previous.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn phase(&self) -> AttemptPhase {
        self.phase
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn rollback_of(&self) -> Option<&AttemptId> {
        self.rollback_of.as_ref()
    }

    pub fn rollback_attempt(&self) -> Option<&AttemptId> {
        self.rollback_attempt.as_ref()
    }

    pub fn is_rollback(&self) -> bool {
        self.rollback_of.is_some()
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Number of distinct steps issued, retries not counted.
    pub fn step_count(&self) -> u32 {
        self.steps.last().map(|r| r.sequence).unwrap_or(0)
    }

    /// Move to `to`. Terminal records are never modified.
    pub(crate) fn enter(&mut self, to: AttemptPhase, reason: Option<String>) {
        if self.phase.is_terminal() {
            tracing::error!(attempt = %self.id, phase = %self.phase, to = %to, "refusing to modify a sealed attempt");
            return;
        }
        let at = Utc::now();
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            at,
            reason: reason.clone(),
        });
        tracing::debug!(attempt = %self.id, workload = %self.workload, from = %self.phase, to = %to, "phase transition");
        self.phase = to;
        if reason.is_some() {
            self.reason = reason;
        }
        if to.is_terminal() {
            self.finished_at = Some(at);
        }
    }

    pub(crate) fn record_step(&mut self, record: StepRecord) {
        if self.phase.is_terminal() {
            tracing::error!(attempt = %self.id, "refusing to log a step on a sealed attempt");
            return;
        }
        self.steps.push(record);
    }

    pub(crate) fn link_rollback(&mut self, rollback: &AttemptId) {
        self.rollback_attempt = Some(rollback.clone());
    }

    /// Freeze a terminal record.
    pub(crate) fn seal(self) -> SealedAttempt {
        debug_assert!(self.phase.is_terminal());
        SealedAttempt(self)
    }
}

/// A terminal attempt. Read-only from here on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedAttempt(RolloutAttempt);

impl SealedAttempt {
    pub fn into_inner(self) -> RolloutAttempt {
        self.0
    }
}

impl Deref for SealedAttempt {
    type Target = RolloutAttempt;

    fn deref(&self) -> &RolloutAttempt {
        &self.0
    }
}
