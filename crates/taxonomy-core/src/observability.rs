//! Observability fabric (component C): counters, evidence sampling,
//! quarantine, operation log, and deterministic PRNGs.
//!
//! Every structure here sorts its output by a canonical key before
//! snapshotting, so two runs with identical inputs and seeds produce
//! byte-identical `observability_snapshot.json` (spec §5, property 6).

use std::collections::BTreeMap;
use std::sync::Mutex;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Canonical counter names per phase, mirroring spec §6's counters schema.
pub fn phase_counters(phase: &str) -> Option<&'static [&'static str]> {
    match phase {
        "S0" => Some(&["pages_seen", "pages_failed", "pages_language_skipped", "blocks_total", "blocks_kept", "blocks_filtered_length", "blocks_deduped", "boilerplate_removed"]),
        "S1" => Some(&["records_in", "candidates_out", "invalid_json", "retries"]),
        "S2" => Some(&["candidates_in", "kept", "dropped_insufficient_support"]),
        "S3" => Some(&["checked", "passed_rule", "failed_rule", "passed_llm", "failed_llm"]),
        "Dedup" => Some(&["pairs_compared", "edges_kept", "components", "merges_applied", "merges_skipped_parent_policy"]),
        "Disambig" => Some(&["collisions_detected", "splits_made", "deferred"]),
        "Validation" => Some(&["checked", "rule_failed", "web_failed", "llm_failed", "passed_all"]),
        "Hierarchy" => Some(&["nodes_in", "nodes_kept", "orphans", "violations", "edges_built"]),
        _ => None,
    }
}

/// Phases that support a labelled counter (e.g. `by_language`) in addition
/// to their plain integer counters.
fn labelled_counters(phase: &str) -> &'static [&'static str] {
    match phase {
        "S0" => &["by_language", "language_counts"],
        _ => &[],
    }
}

#[derive(Debug, Default)]
struct PhaseCounters {
    plain: BTreeMap<String, i64>,
    labelled: BTreeMap<String, BTreeMap<String, i64>>,
}

/// Thread-safe registry of phase-scoped pipeline counters.
#[derive(Debug)]
pub struct CounterRegistry {
    run_id: Option<String>,
    data: Mutex<BTreeMap<String, PhaseCounters>>,
}

impl CounterRegistry {
    /// Create a new, zeroed registry for `run_id`.
    #[must_use]
    pub fn new(run_id: Option<String>) -> Self {
        Self { run_id, data: Mutex::new(BTreeMap::new()) }
    }

    fn ensure_phase<'a>(data: &'a mut BTreeMap<String, PhaseCounters>, phase: &str) -> Result<&'a mut PhaseCounters> {
        if phase_counters(phase).is_none() {
            return Err(Error::Configuration(format!("unknown observability phase '{phase}'")));
        }
        Ok(data.entry(phase.to_string()).or_default())
    }

    /// Increment `counter` within `phase` by `delta`.
    pub fn increment(&self, phase: &str, counter: &str, delta: i64) -> Result<()> {
        self.validate_counter(phase, counter)?;
        let mut data = self.data.lock().expect("counter registry lock poisoned");
        let entry = Self::ensure_phase(&mut data, phase)?;
        *entry.plain.entry(counter.to_string()).or_insert(0) += delta;
        Ok(())
    }

    /// Increment a labelled counter (e.g. `by_language["en"]`) within `phase`.
    pub fn increment_labelled(&self, phase: &str, counter: &str, label: &str, delta: i64) -> Result<()> {
        if !labelled_counters(phase).contains(&counter) {
            return Err(Error::Configuration(format!("counter '{counter}' in phase '{phase}' is not label-based")));
        }
        let mut data = self.data.lock().expect("counter registry lock poisoned");
        let entry = Self::ensure_phase(&mut data, phase)?;
        *entry.labelled.entry(counter.to_string()).or_default().entry(label.to_string()).or_insert(0) += delta;
        Ok(())
    }

    fn validate_counter(&self, phase: &str, counter: &str) -> Result<()> {
        let known = phase_counters(phase).ok_or_else(|| Error::Configuration(format!("unknown observability phase '{phase}'")))?;
        if !known.contains(&counter) {
            return Err(Error::Configuration(format!("unknown counter '{counter}' for phase '{phase}'")));
        }
        Ok(())
    }

    /// Deterministic, sorted snapshot of all counters recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let data = self.data.lock().expect("counter registry lock poisoned");
        let mut counters = BTreeMap::new();
        for (phase, phase_data) in data.iter() {
            let mut merged: BTreeMap<String, serde_json::Value> = BTreeMap::new();
            for (name, value) in &phase_data.plain {
                merged.insert(name.clone(), serde_json::json!(value));
            }
            for (name, labels) in &phase_data.labelled {
                merged.insert(name.clone(), serde_json::json!(labels));
            }
            counters.insert(phase.clone(), merged);
        }
        CounterSnapshot { run_id: self.run_id.clone(), counters }
    }
}

/// Immutable, canonically-ordered counter snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterSnapshot {
    /// Run identifier, if known.
    pub run_id: Option<String>,
    /// Phase -> counter name -> value (or label map), sorted by key.
    pub counters: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

/// A single quarantined item, retained for audit and never silently retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuarantineItem {
    /// Monotonic sequence number, used to produce a stable sort order.
    pub sequence: u64,
    /// Source stage that raised the quarantine.
    pub stage: String,
    /// Originating institution, when known.
    pub institution: Option<String>,
    /// Originating URL, when known.
    pub url: Option<String>,
    /// Error message.
    pub error: String,
    /// The raw payload that failed to process, serialized as a string.
    pub raw_payload: String,
}

/// Append-only quarantine store, bounded on export by `max_items`.
#[derive(Debug, Default)]
pub struct QuarantineStore {
    items: Mutex<Vec<QuarantineItem>>,
    next_sequence: Mutex<u64>,
}

impl QuarantineStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a quarantine item.
    pub fn record(&self, stage: &str, institution: Option<String>, url: Option<String>, error: String, raw_payload: String) {
        let mut seq = self.next_sequence.lock().expect("quarantine sequence lock poisoned");
        let sequence = *seq;
        *seq += 1;
        drop(seq);
        self.items.lock().expect("quarantine store lock poisoned").push(QuarantineItem {
            sequence,
            stage: stage.to_string(),
            institution,
            url,
            error,
            raw_payload,
        });
    }

    /// Export items sorted by sequence number, capped at `max_items`.
    #[must_use]
    pub fn export(&self, max_items: usize) -> Vec<QuarantineItem> {
        let mut items = self.items.lock().expect("quarantine store lock poisoned").clone();
        items.sort_by_key(|i| i.sequence);
        items.truncate(max_items);
        items
    }

    /// Total number of quarantined items recorded (uncapped).
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().expect("quarantine store lock poisoned").len()
    }

    /// Whether no items have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single reservoir-sampled evidence item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceSample {
    /// Sequence number at time of sampling, used for deterministic ordering.
    pub sequence: u64,
    /// Free-form category (e.g. `"dedup_merge"`, `"split"`).
    pub category: String,
    /// Serialized sample payload.
    pub payload: serde_json::Value,
}

/// Reservoir sampler bounded to `capacity` items per phase, guarded by a
/// single lock, using the deterministic PRNG so repeated runs with the same
/// seed retain the same samples.
pub struct EvidenceReservoir {
    capacity: usize,
    rng: Mutex<Prng>,
    items: Mutex<Vec<EvidenceSample>>,
    seen: Mutex<u64>,
}

impl EvidenceReservoir {
    /// Create a reservoir of `capacity` bounded by `seed`.
    #[must_use]
    pub fn new(capacity: usize, seed: &str) -> Self {
        Self { capacity, rng: Mutex::new(Prng::new("evidence-reservoir", seed)), items: Mutex::new(Vec::new()), seen: Mutex::new(0) }
    }

    /// Offer an item to the reservoir; it is kept with probability
    /// `capacity / seen` once capacity is exceeded (classic algorithm R).
    pub fn offer(&self, category: &str, payload: serde_json::Value) {
        let mut seen = self.seen.lock().expect("reservoir seen-count lock poisoned");
        let sequence = *seen;
        *seen += 1;
        let mut items = self.items.lock().expect("reservoir items lock poisoned");
        let sample = EvidenceSample { sequence, category: category.to_string(), payload };
        if items.len() < self.capacity {
            items.push(sample);
        } else {
            let mut rng = self.rng.lock().expect("reservoir rng lock poisoned");
            let j = rng.gen_below(sequence + 1);
            if (j as usize) < self.capacity {
                items[j as usize] = sample;
            }
        }
    }

    /// Sorted snapshot of currently retained samples.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EvidenceSample> {
        let mut items = self.items.lock().expect("reservoir items lock poisoned").clone();
        items.sort_by_key(|i| i.sequence);
        items
    }
}

/// An append-only log entry describing an operation performed by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationLogEntry {
    /// Monotonic sequence number.
    pub sequence: u64,
    /// Phase the operation ran in.
    pub phase: String,
    /// Free-form operation name (e.g. `"merge"`, `"split"`, `"checkpoint_write"`).
    pub operation: String,
    /// Serialized details.
    pub detail: serde_json::Value,
}

/// Append-only, lock-guarded operation log.
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: Mutex<Vec<OperationLogEntry>>,
    next_sequence: Mutex<u64>,
}

impl OperationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, phase: &str, operation: &str, detail: serde_json::Value) {
        let mut seq = self.next_sequence.lock().expect("operation log sequence lock poisoned");
        let sequence = *seq;
        *seq += 1;
        drop(seq);
        self.entries.lock().expect("operation log lock poisoned").push(OperationLogEntry {
            sequence,
            phase: phase.to_string(),
            operation: operation.to_string(),
            detail,
        });
    }

    /// Sorted snapshot of all entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OperationLogEntry> {
        let mut entries = self.entries.lock().expect("operation log lock poisoned").clone();
        entries.sort_by_key(|e| e.sequence);
        entries
    }
}

/// Deterministic PRNG seeded by `hash(namespace || seed)`, per spec §5.
pub struct Prng {
    inner: ChaCha8Rng,
}

impl Prng {
    /// Derive a PRNG from `namespace` and `seed`.
    #[must_use]
    pub fn new(namespace: &str, seed: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(namespace.as_bytes());
        hasher.update(b"||");
        hasher.update(seed.as_bytes());
        let digest = hasher.finalize();
        let seed_bytes: [u8; 32] = *digest.as_bytes();
        Self { inner: ChaCha8Rng::from_seed(seed_bytes) }
    }

    /// Uniform random value in `[0, bound)`.
    pub fn gen_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.inner.next_u64() % bound
    }

    /// Deterministically shuffle `items` in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.gen_below(i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_registry_rejects_unknown_phase() {
        let reg = CounterRegistry::new(None);
        assert!(reg.increment("Nope", "x", 1).is_err());
    }

    #[test]
    fn counter_registry_rejects_unknown_counter() {
        let reg = CounterRegistry::new(None);
        assert!(reg.increment("S0", "not_a_counter", 1).is_err());
    }

    #[test]
    fn counter_registry_increments_and_snapshots() {
        let reg = CounterRegistry::new(Some("run-1".into()));
        reg.increment("S0", "pages_seen", 3).unwrap();
        reg.increment("S0", "pages_seen", 2).unwrap();
        let snap = reg.snapshot();
        assert_eq!(snap.counters["S0"]["pages_seen"], serde_json::json!(5));
    }

    #[test]
    fn quarantine_store_preserves_insertion_order_on_export() {
        let store = QuarantineStore::new();
        store.record("S0", None, None, "e1".into(), "p1".into());
        store.record("S0", None, None, "e2".into(), "p2".into());
        let items = store.export(10);
        assert_eq!(items[0].error, "e1");
        assert_eq!(items[1].error, "e2");
    }

    #[test]
    fn prng_is_deterministic_for_same_seed() {
        let mut a = Prng::new("ns", "seed-1");
        let mut b = Prng::new("ns", "seed-1");
        let seq_a: Vec<u64> = (0..10).map(|_| a.gen_below(1000)).collect();
        let seq_b: Vec<u64> = (0..10).map(|_| b.gen_below(1000)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn evidence_reservoir_respects_capacity() {
        let reservoir = EvidenceReservoir::new(3, "seed");
        for i in 0..20 {
            reservoir.offer("cat", serde_json::json!({"i": i}));
        }
        assert_eq!(reservoir.snapshot().len(), 3);
    }
}
