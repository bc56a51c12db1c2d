//! `manifest` command: inspect a run's `run_manifest.json`.

use std::path::Path;

use anyhow::Result;
use taxonomy_core::config::Settings;

use crate::cli::ManifestCommands;
use crate::pipeline;

pub async fn execute(config_dir: &Path, environment: &str, command: ManifestCommands) -> Result<()> {
    match command {
        ManifestCommands::Show { run_id } => {
            let settings = Settings::load(config_dir, environment)?;
            let manifest = pipeline::load_manifest(&settings.paths.output_dir, &run_id)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
    }
}
