// ABOUTME: Rollback controller: builds the linked attempt that reverts a stalled rollout.
// ABOUTME: Refuses when no previous image is known or when the attempt is itself a rollback.

use super::attempt::RolloutAttempt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RollbackRefusal {
    #[error("no previous image is known, rollback impossible")]
    NoPreviousImage,

    #[error("previous image {0} is the rollout target itself, rollback impossible")]
    SameImage(String),

    #[error("a rollback attempt is never rolled back")]
    AlreadyRollback,
}

pub struct RollbackController;

impl RollbackController {
    /// Create the rollback attempt for `attempt`, targeting its previous image.
    pub fn initiate(attempt: &RolloutAttempt) -> Result<RolloutAttempt, RollbackRefusal> {
        if attempt.is_rollback() {
            return Err(RollbackRefusal::AlreadyRollback);
        }
        let previous = attempt
            .previous()
            .ok_or(RollbackRefusal::NoPreviousImage)?;
        if previous.same_image(attempt.target()) {
            return Err(RollbackRefusal::SameImage(previous.to_string()));
        }

        let rollback = RolloutAttempt::rollback_for(attempt, previous.clone());
        tracing::info!(
            workload = %attempt.workload(),
            attempt = %attempt.id(),
            rollback = %rollback.id(),
            target = %previous,
            "initiating rollback"
        );
        Ok(rollback)
    }
}
