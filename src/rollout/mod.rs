// ABOUTME: Rollout orchestration using the type state pattern.
// ABOUTME: Planner, stall detection, executor loop, rollback controller and the attempt record.

mod attempt;
mod error;
mod executor;
mod machine;
mod planner;
mod rollback;
mod stall;
mod state;
mod step;
mod transitions;
mod workload;

pub use attempt::{AttemptPhase, PhaseTransition, RolloutAttempt, SealedAttempt};
pub use error::{RolloutError, RolloutErrorKind};
pub use executor::ExecContext;
pub use machine::{Checkpoint, Outcome, Rehydrated, Rollout};
pub use planner::{BlockedReason, Plan, plan, plan_counts};
pub use rollback::{RollbackController, RollbackRefusal};
pub use stall::{StallDetector, StallVerdict};
pub use state::{Failed, Pending, Progressing, RolledBack, RollingBack, Stalled, Succeeded};
pub use step::{RolloutStep, StepOutcome, StepRecord};
pub use transitions::{Advanced, RollbackResult, Recovered, Started};
pub use workload::{RolloutStrategy, Workload, WorkloadError};
