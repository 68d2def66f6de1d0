// ABOUTME: Cancel command implementation.
// ABOUTME: Drops a cancel marker that the process driving the attempt picks up at its next poll.

use ferry::config::Config;
use ferry::error::{Error, Result};
use ferry::output::Output;
use ferry::store::AttemptStore;

pub fn cancel(config: Config, workloads: &[String], output: Output) -> Result<()> {
    let store = AttemptStore::new(&config.state_dir);

    for workload in config.select_workloads(workloads)? {
        let key = workload.key();
        let Some(checkpoint) = store.load(&key)? else {
            if workloads.is_empty() {
                continue;
            }
            return Err(Error::NoAttempt(key.to_string()));
        };
        if checkpoint.attempt.phase().is_terminal() {
            output.info(&format!("{}: attempt already finished", key));
            continue;
        }

        store.request_cancel(checkpoint.attempt.id())?;
        output.success(&format!(
            "{}: cancel requested for attempt {}",
            key,
            checkpoint.attempt.id().short()
        ));
    }
    Ok(())
}
