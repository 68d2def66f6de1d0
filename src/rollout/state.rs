// ABOUTME: Rollout state marker types for the type state pattern.
// ABOUTME: Markers carry state-specific data; illegal transitions do not compile.

use super::attempt::{RolloutAttempt, SealedAttempt};

/// Created, nothing applied yet.
/// Available actions: `begin()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Pending;

/// Steps are being applied toward the target image.
/// Available actions: `run()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Progressing;

/// No forward progress; the reason says why.
/// Available actions: `recover()`
#[derive(Debug, Clone)]
pub struct Stalled {
    pub(crate) reason: String,
}

impl Stalled {
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Reverting to the previous image through a linked rollback attempt.
/// Available actions: `run()`
#[derive(Debug, Clone)]
pub struct RollingBack {
    pub(crate) rollback: RolloutAttempt,
}

impl RollingBack {
    pub fn rollback(&self) -> &RolloutAttempt {
        &self.rollback
    }
}

/// Every desired replica runs the target and is ready.
/// Available actions: `seal()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Succeeded;

/// The previous image is serving again.
/// Available actions: `seal()`
#[derive(Debug, Clone)]
pub struct RolledBack {
    pub(crate) rollback: SealedAttempt,
}

/// Terminal failure, possibly after a failed rollback.
/// Available actions: `seal()`
#[derive(Debug, Clone, Default)]
pub struct Failed {
    pub(crate) rollback: Option<SealedAttempt>,
}
