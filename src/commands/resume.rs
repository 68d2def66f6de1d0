// ABOUTME: Resume command implementation.
// ABOUTME: Rehydrates persisted attempts and drives them to a terminal phase.

use super::connection::connect;
use super::{conclude, report, until_interrupted};
use ferry::config::Config;
use ferry::error::Result;
use ferry::output::Output;
use ferry::store::AttemptStore;
use futures::future::join_all;

/// Resume every unfinished attempt among the selected workloads. Returns
/// whether any attempt failed.
pub async fn resume(config: Config, workloads: &[String], force: bool, mut output: Output) -> Result<bool> {
    output.start_timer();
    let store = AttemptStore::new(&config.state_dir);

    let mut keys = Vec::new();
    for workload in config.select_workloads(workloads)? {
        let key = workload.key();
        if store.load(&key)?.is_some() {
            keys.push(key);
        }
    }

    if keys.is_empty() {
        output.info("Nothing to resume");
        return Ok(false);
    }
    output.progress(&format!("Resuming {} attempt(s)", keys.len()));

    let coordinator = connect(&config, &output).await?;
    let work = join_all(keys.iter().map(|key| coordinator.resume(key, force)));
    let results = until_interrupted(&coordinator, work, &output).await;
    let tally = report(results, &output)?;
    Ok(conclude(&tally, "Resume complete!", &output))
}
