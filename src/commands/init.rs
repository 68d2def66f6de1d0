// ABOUTME: Init command implementation.
// ABOUTME: Writes a ferry.yml template into the working directory.

use ferry::config;
use ferry::error::Result;
use ferry::output::Output;
use std::env;

pub fn init(
    workload: Option<&str>,
    repository: Option<&str>,
    force: bool,
    output: Output,
) -> Result<()> {
    let cwd = env::current_dir()?;
    config::init_config(&cwd, workload, repository, force)?;
    output.success(&format!("Created {}", config::CONFIG_FILENAME));
    Ok(())
}
