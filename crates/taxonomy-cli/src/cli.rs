//! Command-line argument parsing for `taxonomy`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Orchestrates the academic taxonomy pipeline: S0 extraction through
/// hierarchy assembly, checkpointed and resumable.
#[derive(Parser, Debug)]
#[command(name = "taxonomy")]
#[command(version)]
#[command(about = "Builds a validated, hierarchical academic-unit taxonomy from institutional web text", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit verbose (debug-level) logs.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress informational logs; only errors are printed.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Directory holding `default.yaml` and `<environment>.yaml` policy files.
    #[arg(long, global = true, value_name = "DIR", env = "TAXONOMY_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,

    /// Runtime environment selecting the policy overlay file.
    #[arg(long, global = true, env = "TAXONOMY_ENV", default_value = "development")]
    pub environment: String,
}

/// Shared options for commands that drive a pipeline run (`run`, `resume`).
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Unique identifier for this run. Generated from the current time when omitted.
    #[arg(long)]
    pub run_id: Option<String>,

    /// JSONL file of tagged input blocks (`{"kind":"snapshot",...}` or `{"kind":"excel",...}`).
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Base URL of the LLM gateway. Omit to run rule/allowlist-only with no LLM calls.
    #[arg(long, env = "TAXONOMY_LLM_URL")]
    pub llm_url: Option<String>,

    /// Bearer token for the LLM gateway.
    #[arg(long, env = "TAXONOMY_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Pre-fetched web evidence snapshots used by the validation stage, as JSONL.
    #[arg(long, value_name = "FILE")]
    pub evidence: Option<PathBuf>,

    /// Explicit phase to (re)start from, instead of the default resume point.
    #[arg(long)]
    pub resume_phase: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a fresh pipeline run.
    Run(RunArgs),

    /// Resume an existing run from its last completed checkpoint (or an explicit phase).
    Resume(RunArgs),

    /// Remove old checkpoint files for a run, keeping the most recent N.
    CleanupCheckpoints {
        /// Run whose checkpoint directory should be cleaned.
        #[arg(long)]
        run_id: String,

        /// Number of most-recent checkpoints to retain.
        #[arg(long, default_value_t = 3)]
        keep_latest_n: usize,

        /// Checkpoints younger than this many seconds are always retained.
        #[arg(long, default_value_t = 3600)]
        grace_period_s: u64,

        /// Report what would be removed without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect a run's manifest.
    Manifest {
        #[command(subcommand)]
        command: ManifestCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ManifestCommands {
    /// Print a run's `run_manifest.json`.
    Show {
        /// Run whose manifest should be printed.
        #[arg(long)]
        run_id: String,
    },
}
