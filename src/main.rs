// ABOUTME: Entry point for the ferry CLI application.
// ABOUTME: Parses arguments, sets up logging, and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use ferry::error::Result;
use ferry::output::{Output, OutputMode};
use tracing_subscriber::EnvFilter;

/// Exit status when an attempt ends `Failed`.
const EXIT_ATTEMPT_FAILED: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    match run(cli.command, mode).await {
        Ok(false) => {}
        Ok(true) => std::process::exit(EXIT_ATTEMPT_FAILED),
        Err(e) => {
            Output::new(mode).error(&e.to_string());
            std::process::exit(1);
        }
    }
}

/// Run one command. `Ok(true)` means an attempt ended `Failed`.
async fn run(command: Commands, mode: OutputMode) -> Result<bool> {
    let output = Output::new(mode);
    match command {
        Commands::Init {
            workload,
            repository,
            force,
        } => commands::init(workload.as_deref(), repository.as_deref(), force, output)
            .map(|()| false),
        Commands::Deploy {
            target,
            build,
            image,
            no_rollback,
            force,
        } => {
            let config = commands::load_config(&target)?;
            let options = commands::DeployOptions {
                workloads: target.workloads,
                build,
                image,
                no_rollback,
                force,
            };
            commands::deploy(config, options, output).await
        }
        Commands::Rollback { target, force } => {
            let config = commands::load_config(&target)?;
            commands::rollback(config, &target.workloads, force, output).await
        }
        Commands::Status { target } => {
            let config = commands::load_config(&target)?;
            commands::status(config, &target.workloads, output)
                .await
                .map(|()| false)
        }
        Commands::History { target, limit } => {
            let config = commands::load_config(&target)?;
            commands::history(config, &target.workloads, limit, output).map(|()| false)
        }
        Commands::Cancel { target } => {
            let config = commands::load_config(&target)?;
            commands::cancel(config, &target.workloads, output).map(|()| false)
        }
        Commands::Resume { target, force } => {
            let config = commands::load_config(&target)?;
            commands::resume(config, &target.workloads, force, output).await
        }
        Commands::Simulate {
            replicas,
            max_surge,
            max_unavailable,
            never_ready,
            no_rollback,
        } => {
            let options = commands::SimulateOptions {
                replicas,
                max_surge,
                max_unavailable,
                never_ready,
                no_rollback,
            };
            commands::simulate(options, output).await
        }
    }
}
