//! Orchestrator CLI for the taxonomy generation pipeline.
//!
//! Wraps `taxonomy-core`'s stage processors and checkpointed orchestration
//! driver behind a `clap` command surface: start or resume a run, inspect a
//! run's manifest, and garbage-collect old checkpoints.

use anyhow::Result;
use clap::Parser;

mod artifacts;
pub mod cli;
mod commands;
mod input;
mod io_jsonl;
mod llm_client;
mod logging;
mod pipeline;
mod state;

use cli::{Cli, Commands};

/// Parse arguments, initialize logging, and dispatch to the requested
/// subcommand.
///
/// # Errors
///
/// Returns an error if logging initialization fails, or if the dispatched
/// command fails (settings load, I/O, a pipeline phase, etc).
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize_logging(&cli)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute_run(&args, &cli.config_dir, &cli.environment).await,
        Commands::Resume(args) => commands::run::execute_resume(&args, &cli.config_dir, &cli.environment).await,
        Commands::CleanupCheckpoints { run_id, keep_latest_n, grace_period_s, dry_run } => {
            commands::cleanup::execute(&cli.config_dir, &cli.environment, &run_id, keep_latest_n, grace_period_s, dry_run).await
        }
        Commands::Manifest { command } => commands::manifest::execute(&cli.config_dir, &cli.environment, command).await,
    }
}
