// ABOUTME: Rollout planner: the next mutations that move a workload toward its target image.
// ABOUTME: Pure and deterministic; every step respects the surge and unavailability budgets.

use serde::{Deserialize, Serialize};

use super::step::RolloutStep;
use super::workload::{RolloutStrategy, Workload};
use crate::cluster::{ReplicaCounts, ReplicaObservation};
use crate::types::ImageRef;

/// Steps are projected one after another on a copy of the counts; a plan
/// never looks further ahead than this.
const MAX_STEPS_PER_PLAN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Converged,
    Steps(Vec<RolloutStep>),
    Blocked(BlockedReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockedReason {
    /// Target replicas exist but are not ready yet.
    AwaitingReadiness { pending: u32 },
    /// Neither budget allows a mutation from the current counts.
    BudgetExhausted,
}

impl Plan {
    pub fn is_converged(&self) -> bool {
        matches!(self, Plan::Converged)
    }

    /// The step to apply now, if any.
    pub fn first(&self) -> Option<&RolloutStep> {
        match self {
            Plan::Steps(steps) => steps.first(),
            _ => None,
        }
    }
}

pub fn plan(workload: &Workload, observation: &ReplicaObservation, target: &ImageRef) -> Plan {
    plan_counts(&workload.strategy, observation.counts(target), target)
}

pub fn plan_counts(strategy: &RolloutStrategy, counts: ReplicaCounts, target: &ImageRef) -> Plan {
    if counts.is_converged() {
        return Plan::Converged;
    }

    let mut projected = counts;
    let mut steps = Vec::new();

    while steps.len() < MAX_STEPS_PER_PLAN {
        let Some(step) = next_step(strategy, &projected, target) else {
            break;
        };
        project(&mut projected, &step);
        let stop = step.is_scale_up();
        steps.push(step);
        // New replicas have to become ready before anything else can move.
        if stop || projected.is_converged() {
            break;
        }
    }

    if steps.is_empty() {
        let pending = counts.updated_unready();
        if pending > 0 {
            Plan::Blocked(BlockedReason::AwaitingReadiness { pending })
        } else {
            Plan::Blocked(BlockedReason::BudgetExhausted)
        }
    } else {
        Plan::Steps(steps)
    }
}

fn next_step(
    strategy: &RolloutStrategy,
    c: &ReplicaCounts,
    target: &ImageRef,
) -> Option<RolloutStep> {
    let desired = i64::from(c.desired);
    let total = i64::from(c.total);
    let updated = i64::from(c.updated);
    let surge = i64::from(strategy.max_surge);
    let unavailable = i64::from(strategy.max_unavailable);

    if updated > desired {
        return Some(RolloutStep::TrimUpdated {
            image: target.clone(),
            count: (updated - desired) as u32,
        });
    }

    let up = (desired + surge - total).min(desired - updated);
    if up > 0 {
        return Some(RolloutStep::ScaleUp {
            image: target.clone(),
            count: up as u32,
        });
    }

    let unready_old = i64::from(c.outdated_unready());
    let ready_old = if c.updated_unready() == 0 {
        let floor = if surge > 0 {
            desired
        } else {
            desired - unavailable
        };
        let by_availability = i64::from(c.ready()) - (desired - unavailable);
        let by_floor = (total - unready_old) - floor;
        i64::from(c.outdated_ready)
            .min(by_availability)
            .min(by_floor)
            .max(0)
    } else {
        0
    };

    let retire = unready_old + ready_old;
    (retire > 0).then(|| RolloutStep::RetireOutdated {
        keep: target.clone(),
        count: retire as u32,
    })
}

/// Apply `step` to `counts` as if the cluster had executed it. Removals take
/// unready replicas first, the same order bindings use.
fn project(counts: &mut ReplicaCounts, step: &RolloutStep) {
    match step {
        RolloutStep::ScaleUp { count, .. } => {
            counts.total += count;
            counts.updated += count;
        }
        RolloutStep::RetireOutdated { count, .. } => {
            let count = (*count).min(counts.outdated);
            let from_ready = count.saturating_sub(counts.outdated_unready());
            counts.outdated -= count;
            counts.outdated_ready -= from_ready;
            counts.total -= count;
        }
        RolloutStep::TrimUpdated { count, .. } => {
            let count = (*count).min(counts.updated);
            let from_ready = count.saturating_sub(counts.updated_unready());
            counts.updated -= count;
            counts.updated_ready -= from_ready;
            counts.total -= count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn strategy(surge: u32, unavailable: u32) -> RolloutStrategy {
        RolloutStrategy::new(surge, unavailable, Duration::from_secs(60)).unwrap()
    }

    fn target() -> ImageRef {
        ImageRef::parse("web:b").unwrap()
    }

    fn counts(desired: u32, updated: u32, updated_ready: u32, outdated: u32, outdated_ready: u32) -> ReplicaCounts {
        ReplicaCounts {
            desired,
            total: updated + outdated,
            updated,
            updated_ready,
            outdated,
            outdated_ready,
        }
    }

    fn up(count: u32) -> RolloutStep {
        RolloutStep::ScaleUp {
            image: target(),
            count,
        }
    }

    fn retire(count: u32) -> RolloutStep {
        RolloutStep::RetireOutdated {
            keep: target(),
            count,
        }
    }

    #[test]
    fn converged_plans_nothing() {
        assert_eq!(
            plan_counts(&strategy(1, 1), counts(3, 3, 3, 0, 0), &target()),
            Plan::Converged
        );
    }

    #[test]
    fn surge_comes_first() {
        assert_eq!(
            plan_counts(&strategy(1, 1), counts(4, 0, 0, 4, 4), &target()),
            Plan::Steps(vec![up(1)])
        );
    }

    #[test]
    fn waits_while_new_replica_is_not_ready() {
        assert_eq!(
            plan_counts(&strategy(1, 1), counts(4, 1, 0, 4, 4), &target()),
            Plan::Blocked(BlockedReason::AwaitingReadiness { pending: 1 })
        );
    }

    #[test]
    fn retires_then_surges_again_once_ready() {
        assert_eq!(
            plan_counts(&strategy(1, 1), counts(4, 1, 1, 4, 4), &target()),
            Plan::Steps(vec![retire(1), up(1)])
        );
    }

    #[test]
    fn last_old_replica_is_retired() {
        assert_eq!(
            plan_counts(&strategy(1, 1), counts(4, 4, 4, 1, 1), &target()),
            Plan::Steps(vec![retire(1)])
        );
    }

    #[test]
    fn without_surge_scales_down_first() {
        assert_eq!(
            plan_counts(&strategy(0, 1), counts(4, 0, 0, 4, 4), &target()),
            Plan::Steps(vec![retire(1), up(1)])
        );
    }

    #[test]
    fn unready_old_replicas_are_always_retired() {
        assert_eq!(
            plan_counts(&strategy(1, 0), counts(2, 1, 0, 2, 0), &target()),
            Plan::Steps(vec![retire(2), up(1)])
        );
    }

    #[test]
    fn surplus_target_replicas_are_trimmed() {
        assert_eq!(
            plan_counts(&strategy(1, 0), counts(2, 3, 3, 0, 0), &target()),
            Plan::Steps(vec![RolloutStep::TrimUpdated {
                image: target(),
                count: 1
            }])
        );
    }

    #[test]
    fn full_surge_budget_blocks_on_readiness() {
        // Everything surged already and nothing is ready: nothing may move.
        assert_eq!(
            plan_counts(&strategy(2, 0), counts(2, 2, 0, 2, 2), &target()),
            Plan::Blocked(BlockedReason::AwaitingReadiness { pending: 2 })
        );
    }
}
