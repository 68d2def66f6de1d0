// ABOUTME: Atomic mutations produced by the planner and the step log that records them.
// ABOUTME: Every request attempt is logged with its outcome before the state machine moves on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ImageRef;

/// One mutation of a workload's replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RolloutStep {
    /// Start `count` replicas on `image`.
    ScaleUp { image: ImageRef, count: u32 },
    /// Remove `count` replicas not running `keep`, unready ones first.
    RetireOutdated { keep: ImageRef, count: u32 },
    /// Remove `count` surplus replicas running `image`, unready ones first.
    TrimUpdated { image: ImageRef, count: u32 },
}

impl RolloutStep {
    pub fn count(&self) -> u32 {
        match self {
            RolloutStep::ScaleUp { count, .. }
            | RolloutStep::RetireOutdated { count, .. }
            | RolloutStep::TrimUpdated { count, .. } => *count,
        }
    }

    pub fn is_scale_up(&self) -> bool {
        matches!(self, RolloutStep::ScaleUp { .. })
    }
}

impl fmt::Display for RolloutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutStep::ScaleUp { image, count } => write!(f, "scale up {} on {}", count, image),
            RolloutStep::RetireOutdated { keep, count } => {
                write!(f, "retire {} not on {}", count, keep)
            }
            RolloutStep::TrimUpdated { image, count } => write!(f, "trim {} on {}", count, image),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Accepted,
    Rejected { reason: String },
    TimedOut { reason: String },
}

impl StepOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, StepOutcome::Accepted)
    }
}

/// A single request attempt for a step. Retries of the same step share a
/// `sequence` and increment `try_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub sequence: u32,
    pub try_number: u32,
    pub step: RolloutStep,
    pub requested_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}
