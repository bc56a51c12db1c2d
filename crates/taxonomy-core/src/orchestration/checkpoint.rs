//! Checkpoint persistence and resume/retention logic (spec §4.L).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::phases::PHASES;

/// Serialized checkpoint for one phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Run this checkpoint belongs to.
    pub run_id: String,
    /// Phase name.
    pub phase: String,
    /// Arbitrary JSON-serializable phase output.
    pub state: serde_json::Value,
    /// When this checkpoint was written.
    pub saved_at: DateTime<Utc>,
}

fn checkpoint_path(dir: &Path, phase: &str) -> PathBuf {
    dir.join(format!("{phase}.checkpoint.json"))
}

/// Write `state` as `<phase>.checkpoint.json` under `dir`.
pub fn write_checkpoint(dir: &Path, run_id: &str, phase: &str, state: serde_json::Value, saved_at: DateTime<Utc>) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let checkpoint = Checkpoint { run_id: run_id.to_string(), phase: phase.to_string(), state, saved_at };
    let path = checkpoint_path(dir, phase);
    let bytes = serde_json::to_vec_pretty(&checkpoint)?;
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Read back the checkpoint for `phase`, if one exists.
pub fn read_checkpoint(dir: &Path, phase: &str) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(dir, phase);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
    Ok(Some(checkpoint))
}

/// List all checkpoint files present under `dir`, sorted by phase order.
#[must_use]
pub fn list_checkpoints(dir: &Path) -> Vec<String> {
    PHASES.iter().filter(|p| checkpoint_path(dir, p).exists()).map(|p| (*p).to_string()).collect()
}

/// Resolve the [`PHASES`] index to resume from. With an explicit
/// `resume_phase`, that phase must be a known name (earlier phases are
/// skipped). Without one, resumes from the phase after the last phase with
/// an on-disk checkpoint.
pub fn resume_index(dir: &Path, resume_phase: Option<&str>) -> Result<usize> {
    if let Some(phase) = resume_phase {
        return PHASES
            .iter()
            .position(|p| *p == phase)
            .ok_or_else(|| Error::Configuration(format!("unknown resume phase '{phase}'")));
    }
    let last_completed = PHASES.iter().enumerate().filter(|(_, p)| checkpoint_path(dir, p).exists()).map(|(idx, _)| idx).max();
    Ok(last_completed.map_or(0, |idx| idx + 1))
}

/// Result of a [`cleanup_checkpoints`] run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupReport {
    /// Checkpoint files removed (or that would be removed, under `dry_run`).
    pub removed: Vec<String>,
    /// Checkpoint files retained.
    pub retained: Vec<String>,
    /// Per-file errors encountered while removing (filename, message).
    pub errors: Vec<(String, String)>,
}

/// Retain the newest `keep_latest_n` checkpoints by mtime (ties broken by
/// filename, descending), sparing any file younger than `grace_period_s`.
/// Under `dry_run`, computes the same report without touching the
/// filesystem.
#[must_use]
pub fn cleanup_checkpoints(dir: &Path, keep_latest_n: usize, dry_run: bool, grace_period_s: u64, now: SystemTime) -> CleanupReport {
    let mut entries: Vec<(String, PathBuf, SystemTime)> = Vec::new();
    for phase in PHASES {
        let path = checkpoint_path(dir, phase);
        let Ok(metadata) = fs::metadata(&path) else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        entries.push(((*phase).to_string(), path, modified));
    }

    entries.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| b.0.cmp(&a.0)));

    let mut report = CleanupReport::default();
    for (idx, (name, path, modified)) in entries.into_iter().enumerate() {
        let age_s = now.duration_since(modified).map(|d| d.as_secs()).unwrap_or(0);
        let within_grace = age_s < grace_period_s;
        let keep = idx < keep_latest_n || within_grace;

        if keep {
            report.retained.push(name);
            continue;
        }

        if dry_run {
            report.removed.push(name);
        } else {
            match fs::remove_file(&path) {
                Ok(()) => report.removed.push(name),
                Err(e) => report.errors.push((name, e.to_string())),
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn resume_index_starts_at_zero_with_no_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resume_index(dir.path(), None).unwrap(), 0);
    }

    #[test]
    fn resume_index_follows_last_completed_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), "run1", "phase1_level0", serde_json::json!({}), Utc::now()).unwrap();
        write_checkpoint(dir.path(), "run1", "phase1_level1", serde_json::json!({}), Utc::now()).unwrap();
        assert_eq!(resume_index(dir.path(), None).unwrap(), 2);
    }

    #[test]
    fn resume_index_rejects_unknown_explicit_phase() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resume_index(dir.path(), Some("not_a_phase")).is_err());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), "run1", "phase2_consolidation", serde_json::json!({"kept": 3}), Utc::now()).unwrap();
        let checkpoint = read_checkpoint(dir.path(), "phase2_consolidation").unwrap().unwrap();
        assert_eq!(checkpoint.run_id, "run1");
        assert_eq!(checkpoint.state, serde_json::json!({"kept": 3}));
    }

    #[test]
    fn cleanup_keeps_newest_n_and_spares_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        for phase in ["phase1_level0", "phase1_level1", "phase1_level2"] {
            write_checkpoint(dir.path(), "run1", phase, serde_json::json!({}), Utc::now()).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        let report = cleanup_checkpoints(dir.path(), 1, true, 0, SystemTime::now() + Duration::from_secs(3600));
        assert_eq!(report.retained.len(), 1);
        assert_eq!(report.removed.len(), 2);
    }
}
