// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Safe image rollouts with automatic rollback")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which workloads on which destination a command acts on.
#[derive(Args, Debug, Clone, Default)]
pub struct Target {
    /// Target destination (defined in config)
    #[arg(short, long)]
    pub destination: Option<String>,

    /// Workload name; repeatable. Defaults to every configured workload.
    #[arg(short, long = "workload")]
    pub workloads: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new ferry.yml configuration file
    Init {
        /// Workload name (defaults to my-app)
        #[arg(long)]
        workload: Option<String>,

        /// Image repository without tag
        #[arg(long)]
        repository: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Roll a new image out to the configured workloads
    Deploy {
        #[command(flatten)]
        target: Target,

        /// Build identifier, resolved through the registry
        #[arg(short, long, required_unless_present = "image")]
        build: Option<String>,

        /// Explicit image reference, used as given
        #[arg(short, long, conflicts_with = "build")]
        image: Option<String>,

        /// Fail instead of rolling back when the rollout stalls
        #[arg(long)]
        no_rollback: bool,

        /// Break a held lock and discard an unfinished attempt
        #[arg(long)]
        force: bool,
    },

    /// Redeploy the image that preceded the last successful rollout
    Rollback {
        #[command(flatten)]
        target: Target,

        /// Break a held lock
        #[arg(long)]
        force: bool,
    },

    /// Show replica counts and any unfinished attempt
    Status {
        #[command(flatten)]
        target: Target,
    },

    /// List finished attempts from the audit log
    History {
        #[command(flatten)]
        target: Target,

        /// Show at most this many records (newest last)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Ask a running attempt to stop and roll back
    Cancel {
        #[command(flatten)]
        target: Target,
    },

    /// Continue an attempt interrupted by a crash or restart
    Resume {
        #[command(flatten)]
        target: Target,

        /// Break a held lock
        #[arg(long)]
        force: bool,
    },

    /// Run a rollout against an in-memory cluster
    Simulate {
        /// Desired replica count
        #[arg(long, default_value_t = 4)]
        replicas: u32,

        #[arg(long, default_value_t = 1)]
        max_surge: u32,

        #[arg(long, default_value_t = 1)]
        max_unavailable: u32,

        /// New replicas never become ready, forcing a rollback
        #[arg(long)]
        never_ready: bool,

        /// Fail instead of rolling back when the rollout stalls
        #[arg(long)]
        no_rollback: bool,
    },
}
