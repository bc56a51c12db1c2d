//! Deduplication blocking strategies (spec §4.H).

use std::collections::BTreeMap;

use crate::config::DeduplicationPolicy;
use crate::normalize::{detect_acronym, phonetic_codes};
use crate::types::Concept;

/// A block: a strategy-keyed bucket of concept ids, sorted, that should be
/// pairwise-compared for duplication.
#[derive(Debug, Clone)]
pub struct Block {
    /// `strategy:key[|chunk_index]`.
    pub id: String,
    /// Blocking strategy name (`prefix`, `phonetic`, `acronym`).
    pub strategy: &'static str,
    /// Member concept ids, sorted.
    pub members: Vec<String>,
}

fn preprocess(canonical: &str) -> String {
    canonical.to_lowercase()
}

fn acronym_key(label: &str) -> Option<String> {
    if detect_acronym(label) {
        return Some(label.to_uppercase());
    }
    let initials: String = label.split_whitespace().filter_map(|t| t.chars().next()).collect::<String>().to_uppercase();
    if initials.len() >= 2 {
        Some(initials)
    } else {
        None
    }
}

fn split_oversized(strategy: &'static str, key: &str, mut members: Vec<String>, max_block_size: usize) -> Vec<Block> {
    members.sort();
    if members.len() <= max_block_size {
        return vec![Block { id: format!("{strategy}:{key}"), strategy, members }];
    }
    members
        .chunks(max_block_size)
        .enumerate()
        .map(|(idx, chunk)| Block { id: format!("{strategy}:{key}|{idx}"), strategy, members: chunk.to_vec() })
        .collect()
}

/// Build all blocks for `concepts`: prefix blocks always, phonetic blocks
/// when `phonetic_enabled`, and acronym blocks for acronym-shaped labels
/// (plus up to 3 aliases per concept). Oversized blocks are deterministically
/// split; singleton blocks are dropped.
#[must_use]
pub fn build_blocks(concepts: &[Concept], policy: &DeduplicationPolicy, phonetic_enabled: bool) -> Vec<Block> {
    let mut prefix_buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut phonetic_buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut acronym_buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for concept in concepts {
        let pre = preprocess(&concept.canonical_label);

        let prefix_key: String = pre.chars().take(policy.prefix_length).collect();
        if !prefix_key.is_empty() {
            prefix_buckets.entry(prefix_key).or_default().push(concept.id.clone());
        }

        if phonetic_enabled {
            for code in phonetic_codes(&concept.canonical_label) {
                phonetic_buckets.entry(code).or_default().push(concept.id.clone());
            }
        }

        let mut candidate_labels = vec![concept.canonical_label.clone()];
        candidate_labels.extend(concept.aliases.iter().take(3).cloned());
        for label in candidate_labels {
            if let Some(key) = acronym_key(&label) {
                acronym_buckets.entry(key).or_default().push(concept.id.clone());
            }
        }
    }

    let mut blocks = Vec::new();
    for (key, members) in prefix_buckets {
        if members.len() < 2 {
            continue;
        }
        blocks.extend(split_oversized("prefix", &key, members, policy.max_block_size));
    }
    for (key, members) in phonetic_buckets {
        let mut members = members;
        members.sort();
        members.dedup();
        if members.len() < 2 {
            continue;
        }
        blocks.extend(split_oversized("phonetic", &key, members, policy.max_block_size));
    }
    for (key, members) in acronym_buckets {
        let mut members = members;
        members.sort();
        members.dedup();
        if members.len() < 2 {
            continue;
        }
        blocks.extend(split_oversized("acronym", &key, members, policy.max_block_size));
    }

    blocks.sort_by(|a, b| b.members.len().cmp(&a.members.len()).then_with(|| a.id.cmp(&b.id)));
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SupportStats;

    fn concept(id: &str, label: &str, aliases: Vec<&str>) -> Concept {
        Concept::new(id, 0, label, vec![], aliases.into_iter().map(String::from).collect(), SupportStats::default(), crate::types::Rationale::default()).unwrap()
    }

    #[test]
    fn prefix_blocks_group_shared_prefixes() {
        let concepts = vec![concept("c1", "computer science", vec![]), concept("c2", "computer engineering", vec![])];
        let policy = DeduplicationPolicy::default();
        let blocks = build_blocks(&concepts, &policy, false);
        assert!(blocks.iter().any(|b| b.strategy == "prefix" && b.members.len() == 2));
    }

    #[test]
    fn singleton_blocks_are_dropped() {
        let concepts = vec![concept("c1", "zzz unique label", vec![])];
        let policy = DeduplicationPolicy::default();
        let blocks = build_blocks(&concepts, &policy, false);
        assert!(blocks.is_empty());
    }

    #[test]
    fn oversized_blocks_split_deterministically() {
        let concepts: Vec<Concept> = (0..5).map(|i| concept(&format!("c{i}"), "aaaa label", vec![])).collect();
        let policy = DeduplicationPolicy { max_block_size: 2, ..DeduplicationPolicy::default() };
        let blocks = build_blocks(&concepts, &policy, false);
        let prefix_blocks: Vec<_> = blocks.iter().filter(|b| b.strategy == "prefix").collect();
        assert!(prefix_blocks.len() >= 3);
        assert!(prefix_blocks.iter().all(|b| b.members.len() <= 2));
    }
}
