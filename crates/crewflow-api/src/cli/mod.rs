//! CLI command definitions for the `crewflow` binary.

pub mod metrics;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run and recover checkpointed agent workflows.
#[derive(Parser)]
#[command(name = "crewflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory (defaults to $CREWFLOW_DATA_DIR or ~/.crewflow).
    #[arg(long, global = true, env = "CREWFLOW_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a workflow from a YAML or JSON template.
    Run {
        /// Path to the template file.
        template: PathBuf,

        /// Workflow id (a fresh UUID when omitted).
        #[arg(long)]
        id: Option<String>,

        /// Shell command run for every task attempt (dry run when omitted).
        #[arg(long)]
        executor: Option<String>,
    },

    /// Continue a paused or interrupted workflow.
    Resume {
        /// Workflow id.
        id: String,

        /// Template the workflow was started from.
        template: PathBuf,

        /// Shell command run for every task attempt (dry run when omitted).
        #[arg(long)]
        executor: Option<String>,
    },

    /// Show progress and recovery options of a workflow.
    Status {
        /// Workflow id.
        id: String,
    },

    /// List workflows that have not reached a terminal status.
    #[command(alias = "ls")]
    List,

    /// Pause a running workflow at its next task boundary.
    Pause {
        /// Workflow id.
        id: String,
    },

    /// Mark a workflow interrupted.
    Interrupt {
        /// Workflow id.
        id: String,

        /// Reason recorded on the workflow.
        #[arg(long, default_value = "Interrupted by operator")]
        reason: String,
    },

    /// Restore a workflow from its latest (or a named) checkpoint.
    Recover {
        /// Workflow id.
        id: String,

        /// Checkpoint id (latest when omitted).
        #[arg(long)]
        checkpoint: Option<String>,
    },

    /// Audit a workflow state for inconsistencies.
    Check {
        /// Workflow id.
        id: String,
    },

    /// Delete a finished workflow's state.
    #[command(alias = "rm")]
    Cleanup {
        /// Workflow id.
        id: String,

        /// Delete even if the workflow has not finished.
        #[arg(long)]
        force: bool,
    },

    /// Inspect and prune performance metrics.
    Metrics {
        #[command(subcommand)]
        action: metrics::MetricsCommand,
    },
}
