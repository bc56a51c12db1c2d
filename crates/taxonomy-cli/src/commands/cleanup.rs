//! `cleanup-checkpoints` command: garbage-collect old checkpoint files.

use std::path::Path;
use std::time::SystemTime;

use anyhow::Result;
use taxonomy_core::config::Settings;
use taxonomy_core::orchestration::cleanup_checkpoints;

pub async fn execute(config_dir: &Path, environment: &str, run_id: &str, keep_latest_n: usize, grace_period_s: u64, dry_run: bool) -> Result<()> {
    let settings = Settings::load(config_dir, environment)?;
    let checkpoint_dir = settings.paths.output_dir.join(run_id).join(&settings.policies.orchestration.checkpoint_dir);

    let report = cleanup_checkpoints(&checkpoint_dir, keep_latest_n, dry_run, grace_period_s, SystemTime::now());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
