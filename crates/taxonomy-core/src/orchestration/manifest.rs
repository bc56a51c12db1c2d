//! Run manifest assembly (spec §4.L, §6).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observability::{CounterSnapshot, OperationLogEntry};

/// Overall run outcome recorded on the manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// All phases completed and finalization's validation report passed.
    Success,
    /// A phase raised, or finalization's validation report failed.
    Failed,
}

/// The full run manifest persisted as `<run_id>/run_manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    /// Unique run identifier.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished (or failed).
    pub finished_at: DateTime<Utc>,
    /// Final status.
    pub status: RunStatus,
    /// Runtime environment (`development`, `testing`, `production`).
    pub environment: String,
    /// Policy document version in effect for this run.
    pub policy_version: String,
    /// Per-phase counter snapshots, keyed by phase name.
    pub phase_stats: BTreeMap<String, CounterSnapshot>,
    /// Full operation log, sequence-ordered.
    pub operation_log: Vec<OperationLogEntry>,
    /// Wall-clock milliseconds spent per phase.
    pub performance_ms: BTreeMap<String, u64>,
    /// Checkpoint files present at manifest-assembly time.
    pub checkpoints: Vec<String>,
    /// Output artifact paths produced by this run, relative to the output dir.
    pub artifacts: Vec<String>,
    /// Which phase failed, if `status == Failed`.
    pub failed_phase: Option<String>,
    /// blake3 digest over the canonicalized manifest substructures.
    pub checksum: String,
}

fn canonical_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonical_json(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// Compute the manifest checksum: blake3 over the canonical (key-sorted)
/// JSON encoding of its statistics/log/timing substructures (excludes the
/// checksum field itself and the wall-clock timestamps, so the digest is
/// stable across runs with identical inputs and seeds).
#[must_use]
pub fn compute_checksum(
    phase_stats: &BTreeMap<String, CounterSnapshot>,
    operation_log: &[OperationLogEntry],
    performance_ms: &BTreeMap<String, u64>,
    checkpoints: &[String],
    artifacts: &[String],
) -> String {
    let payload = serde_json::json!({
        "phase_stats": phase_stats,
        "operation_log": operation_log,
        "performance_ms": performance_ms,
        "checkpoints": checkpoints,
        "artifacts": artifacts,
    });
    let canonical = canonical_json(&payload);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Build the final [`RunManifest`] from the accumulated run state.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn build_manifest(
    run_id: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    status: RunStatus,
    environment: String,
    policy_version: String,
    phase_stats: BTreeMap<String, CounterSnapshot>,
    operation_log: Vec<OperationLogEntry>,
    performance_ms: BTreeMap<String, u64>,
    checkpoints: Vec<String>,
    artifacts: Vec<String>,
    failed_phase: Option<String>,
) -> RunManifest {
    let checksum = compute_checksum(&phase_stats, &operation_log, &performance_ms, &checkpoints, &artifacts);
    RunManifest {
        run_id,
        started_at,
        finished_at,
        status,
        environment,
        policy_version,
        phase_stats,
        operation_log,
        performance_ms,
        checkpoints,
        artifacts,
        failed_phase,
        checksum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_regardless_of_map_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), 1u64);
        a.insert("a".to_string(), 2u64);
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), 2u64);
        b.insert("b".to_string(), 1u64);

        let checksum_a = compute_checksum(&BTreeMap::new(), &[], &a, &[], &[]);
        let checksum_b = compute_checksum(&BTreeMap::new(), &[], &b, &[], &[]);
        assert_eq!(checksum_a, checksum_b);
    }

    #[test]
    fn checksum_changes_when_content_changes() {
        let mut a = BTreeMap::new();
        a.insert("phase1_level0".to_string(), 10u64);
        let mut b = BTreeMap::new();
        b.insert("phase1_level0".to_string(), 11u64);

        let checksum_a = compute_checksum(&BTreeMap::new(), &[], &a, &[], &[]);
        let checksum_b = compute_checksum(&BTreeMap::new(), &[], &b, &[], &[]);
        assert_ne!(checksum_a, checksum_b);
    }
}
