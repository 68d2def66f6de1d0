// ABOUTME: Command module aggregator for the ferry CLI.
// ABOUTME: Shared helpers for loading config, connecting, and reporting outcomes.

mod cancel;
mod connection;
mod deploy;
mod history;
mod init;
mod resume;
mod rollback;
mod simulate;
mod status;

pub use cancel::cancel;
pub use deploy::{DeployOptions, deploy};
pub use history::history;
pub use init::init;
pub use resume::resume;
pub use rollback::rollback;
pub use simulate::{SimulateOptions, simulate};
pub use status::status;

use crate::cli::Target;
use ferry::cluster::{ClusterOps, RegistryOps};
use ferry::config::Config;
use ferry::coordinator::{Coordinator, DeployReport};
use ferry::error::{Error, Result};
use ferry::output::Output;
use ferry::rollout::Outcome;
use std::env;
use std::future::Future;

/// Discover the config in the working directory and apply the destination.
pub fn load_config(target: &Target) -> Result<Config> {
    let cwd = env::current_dir()?;
    let config = Config::discover(&cwd)?;
    match &target.destination {
        Some(dest) => config.for_destination(dest),
        None => Ok(config),
    }
}

/// How many requests ended in each terminal phase.
#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    rolled_back: usize,
    failed: usize,
}

/// Print every report and its warnings. The first request error is
/// returned once everything else has been printed.
fn report(results: Vec<Result<DeployReport>>, output: &Output) -> Result<Tally> {
    let mut tally = Tally::default();
    let mut first_error: Option<Error> = None;

    for result in results {
        match result {
            Ok(report) => {
                output.outcome(&report.outcome);
                for warning in report.diagnostics.warnings() {
                    output.warning(&warning.to_string());
                }
                match report.outcome {
                    Outcome::Succeeded(_) => tally.succeeded += 1,
                    Outcome::RolledBack { .. } => tally.rolled_back += 1,
                    Outcome::Failed { .. } => tally.failed += 1,
                }
            }
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(e) => output.error(&e.to_string()),
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(tally),
    }
}

/// Final line for a batch of rollouts. Returns whether any attempt failed.
fn conclude(tally: &Tally, done: &str, output: &Output) -> bool {
    if tally.failed > 0 {
        output.warning(&format!(
            "{} attempt(s) failed; operator attention required",
            tally.failed
        ));
    } else if tally.rolled_back > 0 {
        output.warning(&format!(
            "{} workload(s) rolled back, {} succeeded",
            tally.rolled_back, tally.succeeded
        ));
    } else {
        output.success(done);
    }
    tally.failed > 0
}

/// Await `work`; on Ctrl-C, cancel the running attempts and keep waiting
/// so they can stop (and roll back) cleanly.
async fn until_interrupted<C, R, T>(
    coordinator: &Coordinator<C, R>,
    work: impl Future<Output = T>,
    output: &Output,
) -> T
where
    C: ClusterOps,
    R: RegistryOps,
{
    tokio::pin!(work);
    tokio::select! {
        result = &mut work => result,
        _ = tokio::signal::ctrl_c() => {
            let count = coordinator.cancel_all();
            output.warning(&format!("Interrupted, cancelling {} attempt(s)", count));
            work.await
        }
    }
}
