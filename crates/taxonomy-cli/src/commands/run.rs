//! `run` and `resume` commands: drive one pipeline invocation end to end.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::cli::RunArgs;
use crate::pipeline;

/// Starts a fresh run. A `run_id` is generated when the caller doesn't
/// supply one, so repeated `run` invocations never collide.
pub async fn execute_run(args: &RunArgs, config_dir: &Path, environment: &str) -> Result<()> {
    drive(args.clone(), config_dir.to_path_buf(), environment.to_string()).await
}

/// Resumes an existing run. Unlike `run`, a `run_id` is required: there is
/// no fresh run to generate an id for.
pub async fn execute_resume(args: &RunArgs, config_dir: &Path, environment: &str) -> Result<()> {
    if args.run_id.is_none() {
        bail!("resume requires --run-id");
    }
    drive(args.clone(), config_dir.to_path_buf(), environment.to_string()).await
}

async fn drive(args: RunArgs, config_dir: PathBuf, environment: String) -> Result<()> {
    let manifest = tokio::task::spawn_blocking(move || pipeline::execute(&args, &config_dir, &environment))
        .await
        .context("pipeline task panicked")??;

    println!("{}", serde_json::to_string_pretty(&manifest)?);

    if matches!(manifest.status, taxonomy_core::RunStatus::Failed) {
        bail!("run {} failed at phase {:?}", manifest.run_id, manifest.failed_phase);
    }
    Ok(())
}
