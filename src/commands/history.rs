// ABOUTME: History command implementation.
// ABOUTME: Lists sealed attempts from the audit log, oldest first.

use ferry::config::Config;
use ferry::error::Result;
use ferry::output::Output;
use ferry::store::AttemptStore;
use ferry::types::WorkloadKey;

pub fn history(config: Config, workloads: &[String], limit: Option<usize>, output: Output) -> Result<()> {
    let keys: Vec<WorkloadKey> = config
        .select_workloads(workloads)?
        .iter()
        .map(|w| w.key())
        .collect();

    let records = AttemptStore::new(&config.state_dir).audit_log().read_all()?;
    let matching: Vec<_> = records
        .iter()
        .filter(|a| keys.contains(a.workload()))
        .collect();

    if matching.is_empty() {
        output.info("No attempts recorded");
        return Ok(());
    }

    let skip = limit.map_or(0, |n| matching.len().saturating_sub(n));
    for attempt in matching.into_iter().skip(skip) {
        output.attempt(attempt);
    }
    Ok(())
}
