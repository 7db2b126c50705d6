//! crewflow CLI entry point.
//!
//! Binary name: `crewflow`
//!
//! Parses CLI arguments, initializes tracing and the file-backed state,
//! then dispatches to the command handler.

mod cli;
mod executor;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = crewflow_observe::default_filter(cli.verbose, cli.quiet);
    if let Err(err) = crewflow_observe::init_tracing(cli.otel, filter) {
        eprintln!("Warning: failed to initialize tracing: {err}");
    }

    let state = AppState::init(cli.data_dir.clone()).await?;

    let result = match cli.command {
        Commands::Run {
            template,
            id,
            executor,
        } => cli::workflow::run(&state, &template, id, executor, cli.json).await,
        Commands::Resume {
            id,
            template,
            executor,
        } => cli::workflow::resume(&state, &id, &template, executor, cli.json).await,
        Commands::Status { id } => cli::workflow::status(&state, &id, cli.json).await,
        Commands::List => cli::workflow::list(&state, cli.json).await,
        Commands::Pause { id } => cli::workflow::pause(&state, &id, cli.json).await,
        Commands::Interrupt { id, reason } => {
            cli::workflow::interrupt(&state, &id, &reason, cli.json).await
        }
        Commands::Recover { id, checkpoint } => {
            cli::workflow::recover(&state, &id, checkpoint.as_deref(), cli.json).await
        }
        Commands::Check { id } => cli::workflow::check(&state, &id, cli.json).await,
        Commands::Cleanup { id, force } => cli::workflow::cleanup(&state, &id, force, cli.json).await,
        Commands::Metrics { action } => cli::metrics::handle(&state, action, cli.json).await,
    };

    crewflow_observe::shutdown_tracing();
    result
}
