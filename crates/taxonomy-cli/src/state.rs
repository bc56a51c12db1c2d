//! In-memory working state threaded across one run's phase closures.
//!
//! Every stage still writes its JSONL/JSON artifacts to disk per spec §6
//! (for audit, and so a later process can resume from a checkpoint); this
//! struct is the within-process shortcut that avoids re-reading every
//! dependency's artifact back off disk between phases of the same
//! invocation. A phase runner that finds its inputs already populated here
//! uses them directly; one invoked after a fresh-process resume re-hydrates
//! from disk first (see `pipeline::load_or` helpers).

use std::collections::BTreeMap;

use taxonomy_core::disambiguation::ConceptEvidence;
use taxonomy_core::s1::CandidateBucket;
use taxonomy_core::types::{Concept, MergeOp, SourceRecord, SplitOp};

/// Concepts produced so far, per hierarchy level.
#[derive(Debug, Clone)]
pub struct LevelConcepts {
    /// Index 0..=3, one entry per level.
    pub by_level: [Vec<Concept>; 4],
}

impl Default for LevelConcepts {
    fn default() -> Self {
        Self { by_level: [Vec::new(), Vec::new(), Vec::new(), Vec::new()] }
    }
}

impl LevelConcepts {
    /// Flatten all levels into one concept list, sorted by id.
    #[must_use]
    pub fn flatten(&self) -> Vec<Concept> {
        let mut all: Vec<Concept> = self.by_level.iter().flatten().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Replace every level's contents from a flattened, re-partitioned list.
    pub fn reassign(&mut self, concepts: Vec<Concept>) {
        for level in &mut self.by_level {
            level.clear();
        }
        for concept in concepts {
            self.by_level[concept.level as usize].push(concept);
        }
    }

    /// Rewrite parent references across every level: any parent id present
    /// in `remap` is replaced by its mapped winner id. Used after a dedup
    /// merge so children still point at a now-absorbed loser's survivor.
    pub fn apply_remap(&mut self, remap: &BTreeMap<String, String>) {
        for level in &mut self.by_level {
            for concept in level {
                for parent in &mut concept.parents {
                    if let Some(winner) = remap.get(parent) {
                        *parent = winner.clone();
                    }
                }
                concept.parents.sort();
                concept.parents.dedup();
            }
        }
    }
}

/// Accumulated state for one run, shared by reference across phase closures.
#[derive(Debug)]
pub struct PipelineState {
    /// S0 output: every source record produced from the run's input blocks.
    pub source_records: Vec<SourceRecord>,
    /// Fingerprint -> source record, for evidence/context lookups in later phases.
    pub fingerprint_index: BTreeMap<String, SourceRecord>,
    /// S1 buckets per level, retained (pre-S2) so evidence/institution names
    /// can be recovered after S2 collapses them to aggregate counts.
    pub buckets_by_level: [BTreeMap<(String, Vec<String>), CandidateBucket>; 4],
    /// Concepts surviving S0-S3, by level, updated in place by later phases.
    pub concepts: LevelConcepts,
    /// Side-channel evidence (institutions, context windows) per concept id.
    pub evidence: BTreeMap<String, ConceptEvidence>,
    /// All merge operations applied so far (phase2 and phase3 dedup passes).
    pub merge_ops: Vec<MergeOp>,
    /// All split operations applied so far (phase3 disambiguation passes).
    pub split_ops: Vec<SplitOp>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            source_records: Vec::new(),
            fingerprint_index: BTreeMap::new(),
            buckets_by_level: [BTreeMap::new(), BTreeMap::new(), BTreeMap::new(), BTreeMap::new()],
            concepts: LevelConcepts::default(),
            evidence: BTreeMap::new(),
            merge_ops: Vec::new(),
            split_ops: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxonomy_core::types::{Rationale, SupportStats};

    fn concept(id: &str, level: u8, parents: Vec<String>) -> Concept {
        Concept::new(id, level, format!("label-{id}"), parents, Vec::new(), SupportStats::default(), Rationale::default()).unwrap()
    }

    #[test]
    fn flatten_sorts_across_levels_by_id() {
        let mut state = LevelConcepts::default();
        state.by_level[1].push(concept("b", 1, vec!["root".into()]));
        state.by_level[0].push(concept("a", 0, Vec::new()));
        let flat = state.flatten();
        assert_eq!(flat.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn reassign_repartitions_by_level() {
        let mut state = LevelConcepts::default();
        state.by_level[0].push(concept("stale", 0, Vec::new()));
        state.reassign(vec![concept("fresh", 2, vec!["root".into()])]);
        assert!(state.by_level[0].is_empty());
        assert_eq!(state.by_level[2].len(), 1);
        assert_eq!(state.by_level[2][0].id, "fresh");
    }

    #[test]
    fn apply_remap_rewrites_parent_references_and_dedups() {
        let mut state = LevelConcepts::default();
        state.by_level[1].push(concept("child", 1, vec!["loser".into(), "loser".into()]));
        let mut remap = BTreeMap::new();
        remap.insert("loser".to_string(), "winner".to_string());
        state.apply_remap(&remap);
        assert_eq!(state.by_level[1][0].parents, vec!["winner".to_string()]);
    }
}
