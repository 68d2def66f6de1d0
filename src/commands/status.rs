// ABOUTME: Status command implementation.
// ABOUTME: Shows replicas per image for each workload and any unfinished attempt.

use super::connection::connect;
use ferry::cluster::observe_with_timeout;
use ferry::config::Config;
use ferry::error::Result;
use ferry::output::Output;
use std::collections::BTreeMap;

pub async fn status(config: Config, workloads: &[String], output: Output) -> Result<()> {
    let coordinator = connect(&config, &output).await?;

    for workload_config in config.select_workloads(workloads)? {
        let workload = workload_config.to_workload()?;
        let observation = observe_with_timeout(
            coordinator.cluster(),
            &workload,
            config.rollout.observe_timeout,
        )
        .await?;

        // image -> (total, ready)
        let mut images: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        for replica in observation.replicas() {
            let entry = images.entry(replica.image.to_string()).or_default();
            entry.0 += 1;
            if replica.ready {
                entry.1 += 1;
            }
        }

        output.info(&format!(
            "{}: {}/{} ready (desired {})",
            workload.key,
            observation.ready(),
            observation.current(),
            workload.desired
        ));
        for (image, (total, ready)) in &images {
            output.info(&format!("    {} {}/{} ready", image, ready, total));
        }

        if let Some(store) = coordinator.store()
            && let Some(checkpoint) = store.load(&workload.key)?
        {
            output.attempt(&checkpoint.attempt);
        }
    }
    Ok(())
}
