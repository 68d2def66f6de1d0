// ABOUTME: Rollback command implementation.
// ABOUTME: Redeploys the image that the most recent successful attempt replaced.

use super::connection::connect;
use super::{conclude, report, until_interrupted};
use ferry::config::Config;
use ferry::coordinator::{DeployRequest, ImageSource};
use ferry::error::{Error, Result};
use ferry::output::Output;
use ferry::rollout::{AttemptPhase, RolloutAttempt};
use ferry::store::AttemptStore;
use ferry::types::{ImageRef, WorkloadKey};

/// Roll the selected workloads back one release. Returns whether any
/// attempt failed.
pub async fn rollback(
    config: Config,
    workloads: &[String],
    force: bool,
    mut output: Output,
) -> Result<bool> {
    output.start_timer();
    let store = AttemptStore::new(&config.state_dir);
    let history = store.audit_log().read_all()?;

    let mut requests = Vec::new();
    for workload in config.select_workloads(workloads)? {
        let key = workload.key();
        let (current, previous) =
            last_release(&history, &key).ok_or_else(|| Error::NoAttempt(key.to_string()))?;

        output.progress(&format!("  → {}: {} -> {}", key, current, previous));
        requests.push(DeployRequest {
            workload: workload.to_workload()?.with_current_image(current.clone()),
            source: ImageSource::Image(previous.clone()),
            rollback: None,
            force,
        });
    }

    let coordinator = connect(&config, &output).await?;
    let results =
        until_interrupted(&coordinator, coordinator.deploy_all(requests), &output).await;
    let tally = report(results, &output)?;
    Ok(conclude(&tally, "Rollback complete!", &output))
}

/// Target and previous image of the newest succeeded, non-rollback
/// attempt for `key` that knows what it replaced.
fn last_release<'a>(
    history: &'a [RolloutAttempt],
    key: &WorkloadKey,
) -> Option<(&'a ImageRef, &'a ImageRef)> {
    history.iter().rev().find_map(|a| {
        let eligible =
            a.workload() == key && a.phase() == AttemptPhase::Succeeded && !a.is_rollback();
        match a.previous() {
            Some(previous) if eligible => Some((a.target(), previous)),
            _ => None,
        }
    })
}
