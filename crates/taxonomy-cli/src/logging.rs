//! Logging initialization.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::cli::Cli;

/// Initialize the global tracing subscriber from `cli`'s verbosity flags.
/// Writes to stderr so stdout stays free for machine-readable output.
pub fn initialize_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).with_target(false).with_writer(std::io::stderr).finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
