//! Deduplication (component H): blocking, pairwise scoring, and merge-policy
//! application over a single level's kept concepts.

pub mod blocking;
pub mod merge;
pub mod scoring;

pub use blocking::{build_blocks, Block};
pub use merge::{connected_components, merge_component};
pub use scoring::{parent_compatible, score_pair, EdgeFeatures, ScoredEdge};

use std::collections::BTreeMap;

use tracing::warn;

use crate::config::DeduplicationPolicy;
use crate::observability::CounterRegistry;
use crate::types::{Concept, MergeOp};

/// Outcome of running deduplication over one batch of concepts: the
/// surviving concepts (merge winners plus untouched singletons) and the
/// audit trail of merges applied.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Concepts remaining after merges, sorted by id.
    pub concepts: Vec<Concept>,
    /// One entry per applied merge.
    pub merge_ops: Vec<MergeOp>,
}

/// Runs blocking, pairwise scoring, and merge-policy application over
/// `concepts`. Deduplicates by concept id first (keeping the last occurrence
/// and logging a warning on collision), as the spec requires.
pub struct DedupProcessor<'a> {
    policy: &'a DeduplicationPolicy,
    counters: &'a CounterRegistry,
    phonetic_enabled: bool,
}

impl<'a> DedupProcessor<'a> {
    /// Construct a processor bound to `policy`. `phonetic_enabled` gates the
    /// phonetic blocking strategy (double metaphone), which callers may want
    /// to disable for non-English corpora.
    #[must_use]
    pub fn new(policy: &'a DeduplicationPolicy, counters: &'a CounterRegistry, phonetic_enabled: bool) -> Self {
        Self { policy, counters, phonetic_enabled }
    }

    /// Process `concepts`: dedup by id, block, pairwise-score within blocks,
    /// union-find into components, and apply the merge policy per component.
    pub fn process(&self, concepts: Vec<Concept>) -> DedupOutcome {
        let mut by_id: BTreeMap<String, Concept> = BTreeMap::new();
        let mut duplicate_ids = 0u64;
        for concept in concepts {
            if by_id.insert(concept.id.clone(), concept).is_some() {
                duplicate_ids += 1;
            }
        }
        if duplicate_ids > 0 {
            warn!(duplicate_ids, "duplicate concept ids in dedup input; keeping last occurrence");
        }

        let ordered: Vec<Concept> = by_id.values().cloned().collect();
        let node_ids: Vec<String> = ordered.iter().map(|c| c.id.clone()).collect();

        let blocks = build_blocks(&ordered, self.policy, self.phonetic_enabled);

        let mut edges: Vec<ScoredEdge> = Vec::new();
        let mut edges_by_pair: BTreeMap<(String, String), ScoredEdge> = BTreeMap::new();
        let mut pairs_compared = 0u64;

        for block in &blocks {
            let members: Vec<&Concept> = block.members.iter().filter_map(|id| by_id.get(id)).collect();
            let mut compared_in_block = 0usize;
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    if compared_in_block >= self.policy.max_comparisons_per_block {
                        break;
                    }
                    compared_in_block += 1;
                    pairs_compared += 1;
                    if let Some(edge) = score_pair(members[i], members[j], block, self.policy) {
                        let key = (edge.a.clone(), edge.b.clone());
                        edges_by_pair.entry(key).or_insert_with(|| edge.clone());
                        edges.push(edge);
                    }
                }
            }
        }
        let _ = self.counters.increment("Dedup", "pairs_compared", pairs_compared as i64);
        let _ = self.counters.increment("Dedup", "edges_kept", edges.len() as i64);

        let components = connected_components(&node_ids, &edges);
        let _ = self.counters.increment("Dedup", "components", components.len() as i64);

        let mut merged_ids: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        let mut survivors: BTreeMap<String, Concept> = by_id.clone();
        let mut merge_ops = Vec::new();

        for component in &components {
            match merge_component(component, &by_id, &edges_by_pair, self.policy) {
                Ok(Some((merged, op))) => {
                    for loser in &op.losers {
                        survivors.remove(loser);
                        merged_ids.insert(loser.clone());
                    }
                    survivors.insert(merged.id.clone(), merged);
                    merge_ops.push(op);
                    let _ = self.counters.increment("Dedup", "merges_applied", 1);
                }
                Ok(None) => {
                    let _ = self.counters.increment("Dedup", "merges_skipped_parent_policy", 1);
                }
                Err(e) => {
                    warn!(error = %e, "skipping merge for malformed component");
                    let _ = self.counters.increment("Dedup", "merges_skipped_parent_policy", 1);
                }
            }
        }

        let mut concepts: Vec<Concept> = survivors.into_values().collect();
        concepts.sort_by(|a, b| a.id.cmp(&b.id));
        merge_ops.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));

        DedupOutcome { concepts, merge_ops }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rationale, SupportStats};

    fn concept(id: &str, label: &str, institutions: u64) -> Concept {
        Concept::new(id, 0, label, vec![], vec![], SupportStats { records: 1, institutions, count: 1 }, Rationale::default()).unwrap()
    }

    #[test]
    fn process_merges_near_identical_labels_and_keeps_distinct_ones() {
        let policy = DeduplicationPolicy::default();
        let counters = CounterRegistry::new(None);
        let processor = DedupProcessor::new(&policy, &counters, false);
        let concepts = vec![
            concept("a", "computer science", 1),
            concept("b", "computer sciences", 2),
            concept("c", "art history", 1),
        ];
        let outcome = processor.process(concepts);
        assert_eq!(outcome.concepts.len(), 2);
        assert_eq!(outcome.merge_ops.len(), 1);
        let merged = outcome.concepts.iter().find(|c| c.id == "b").unwrap();
        assert_eq!(merged.support.institutions, 3);
    }

    #[test]
    fn process_keeps_last_occurrence_of_duplicate_ids() {
        let policy = DeduplicationPolicy::default();
        let counters = CounterRegistry::new(None);
        let processor = DedupProcessor::new(&policy, &counters, false);
        let concepts = vec![concept("a", "biology", 1), concept("a", "biology", 5)];
        let outcome = processor.process(concepts);
        assert_eq!(outcome.concepts.len(), 1);
        assert_eq!(outcome.concepts[0].support.institutions, 5);
    }
}
