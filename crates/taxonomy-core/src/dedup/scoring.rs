//! Pairwise duplicate scoring (spec §4.H).

use std::collections::BTreeMap;

use crate::config::DeduplicationPolicy;
use crate::normalize::{abbrev_score, jaro_winkler, suffix_prefix_hint, token_jaccard};
use crate::types::Concept;

use super::blocking::Block;

/// Raw per-feature scores computed for one candidate pair.
#[derive(Debug, Clone, Default)]
pub struct EdgeFeatures {
    /// Acronym/abbreviation match score.
    pub abbrev_score: f64,
    /// Jaro-Winkler similarity.
    pub jaro_winkler: f64,
    /// Token-Jaccard similarity.
    pub token_jaccard: f64,
    /// Suffix/prefix hint score, when configured suffixes are present.
    pub suffix_prefix_hint: f64,
}

/// An accepted duplicate edge between two concept ids.
#[derive(Debug, Clone)]
pub struct ScoredEdge {
    /// First concept id (lexicographically smaller).
    pub a: String,
    /// Second concept id.
    pub b: String,
    /// Combined score (clamped to <= 1.0).
    pub score: f64,
    /// Acceptance threshold in effect for this pair.
    pub threshold: f64,
    /// Name of the feature that drove the combined score.
    pub driver: &'static str,
    /// Block id the pair was compared within.
    pub block: String,
    /// Raw per-feature scores.
    pub features: EdgeFeatures,
    /// Weighted feature scores, by name.
    pub weighted: BTreeMap<String, f64>,
}

/// Whether `a` and `b` are eligible to merge under the parent-compatibility
/// gate: both L0 are always compatible; otherwise either side having no
/// parents is only allowed when `cross_parent_merge_allowed`, and parent
/// sets must intersect unless cross-parent merges are allowed.
#[must_use]
pub fn parent_compatible(a: &Concept, b: &Concept, cross_parent_merge_allowed: bool) -> bool {
    if a.level == 0 && b.level == 0 {
        return true;
    }
    if cross_parent_merge_allowed {
        return true;
    }
    if a.parents.is_empty() || b.parents.is_empty() {
        return false;
    }
    a.parents.iter().any(|p| b.parents.contains(p))
}

const ABBREV_WEIGHT: f64 = 1.0;

/// Score the candidate pair `(a, b)` found in `block`. Returns `None` when
/// the parent-compatibility gate rejects the pair, or (for phonetic blocks)
/// the cheap Jaro-Winkler probe doesn't clear `phonetic_probe_threshold`, or
/// the combined score falls below the acceptance threshold.
#[must_use]
pub fn score_pair(a: &Concept, b: &Concept, block: &Block, policy: &DeduplicationPolicy) -> Option<ScoredEdge> {
    if !parent_compatible(a, b, policy.cross_parent_merge_allowed) {
        return None;
    }

    if block.strategy == "phonetic" {
        let probe = jaro_winkler(&a.canonical_label.to_lowercase(), &b.canonical_label.to_lowercase());
        if probe < policy.phonetic_probe_threshold {
            return None;
        }
    }

    let mut features = EdgeFeatures::default();
    let mut weighted: BTreeMap<String, f64> = BTreeMap::new();

    features.abbrev_score = best_abbrev_score(a, b);
    weighted.insert("abbrev_score".to_string(), features.abbrev_score * ABBREV_WEIGHT);
    if policy.early_stopping && features.abbrev_score >= policy.min_similarity_threshold {
        return finalize(a, b, block, policy, features, weighted);
    }

    features.jaro_winkler = jaro_winkler(&a.canonical_label.to_lowercase(), &b.canonical_label.to_lowercase());
    weighted.insert("jaro_winkler".to_string(), features.jaro_winkler);
    if policy.early_stopping && features.jaro_winkler >= policy.min_similarity_threshold {
        return finalize(a, b, block, policy, features, weighted);
    }

    features.token_jaccard = token_jaccard(&a.canonical_label, &b.canonical_label);
    weighted.insert("token_jaccard".to_string(), features.token_jaccard);

    let suffixes: Vec<&str> = Vec::new();
    let hint = suffix_prefix_hint(&a.canonical_label, &b.canonical_label, &suffixes);
    if hint > 0.0 {
        features.suffix_prefix_hint = hint;
        weighted.insert("suffix_prefix_hint".to_string(), hint * ABBREV_WEIGHT.max(1.0));
    }

    finalize(a, b, block, policy, features, weighted)
}

fn best_abbrev_score(a: &Concept, b: &Concept) -> f64 {
    let mut best = abbrev_score(&a.canonical_label, &b.canonical_label);
    for alias in a.aliases.iter().take(3) {
        best = best.max(abbrev_score(alias, &b.canonical_label));
    }
    for alias in b.aliases.iter().take(3) {
        best = best.max(abbrev_score(&a.canonical_label, alias));
    }
    best
}

fn finalize(a: &Concept, b: &Concept, block: &Block, policy: &DeduplicationPolicy, features: EdgeFeatures, weighted: BTreeMap<String, f64>) -> Option<ScoredEdge> {
    let combined = weighted.values().cloned().fold(0.0_f64, f64::max).min(1.0);
    let driver = weighted
        .iter()
        .max_by(|x, y| x.1.partial_cmp(y.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(k, _)| match k.as_str() {
            "abbrev_score" => "abbrev_score",
            "jaro_winkler" => "jaro_winkler",
            "token_jaccard" => "token_jaccard",
            _ => "suffix_prefix_hint",
        })
        .unwrap_or("jaro_winkler");

    let max_level = a.level.max(b.level);
    let level_threshold = if max_level <= 1 { policy.l0_l1_threshold } else { policy.l2_l3_threshold };
    let threshold = level_threshold.max(policy.min_similarity_threshold);

    if combined < threshold {
        return None;
    }

    let (lo, hi) = if a.id <= b.id { (a.id.clone(), b.id.clone()) } else { (b.id.clone(), a.id.clone()) };
    Some(ScoredEdge { a: lo, b: hi, score: combined, threshold, driver, block: block.id.clone(), features, weighted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rationale, SupportStats};

    fn concept(id: &str, label: &str, level: u8, parents: Vec<&str>) -> Concept {
        Concept::new(id, level, label, parents.into_iter().map(String::from).collect(), vec![], SupportStats::default(), Rationale::default()).unwrap()
    }

    #[test]
    fn parent_compatible_level_zero_always_true() {
        let a = concept("a", "x", 0, vec![]);
        let b = concept("b", "y", 0, vec![]);
        assert!(parent_compatible(&a, &b, false));
    }

    #[test]
    fn parent_compatible_requires_intersection_above_l0() {
        let a = concept("a", "x", 1, vec!["p1"]);
        let b = concept("b", "y", 1, vec!["p2"]);
        assert!(!parent_compatible(&a, &b, false));
        let c = concept("c", "z", 1, vec!["p1", "p3"]);
        assert!(parent_compatible(&a, &c, false));
    }

    #[test]
    fn score_pair_accepts_near_identical_labels() {
        let a = concept("a", "computer science", 0, vec![]);
        let b = concept("b", "computer sciences", 0, vec![]);
        let block = Block { id: "prefix:comp".into(), strategy: "prefix", members: vec!["a".into(), "b".into()] };
        let policy = DeduplicationPolicy::default();
        let edge = score_pair(&a, &b, &block, &policy);
        assert!(edge.is_some());
    }

    #[test]
    fn score_pair_rejects_dissimilar_labels() {
        let a = concept("a", "computer science", 0, vec![]);
        let b = concept("b", "art history", 0, vec![]);
        let block = Block { id: "prefix:aaa".into(), strategy: "prefix", members: vec!["a".into(), "b".into()] };
        let policy = DeduplicationPolicy::default();
        assert!(score_pair(&a, &b, &block, &policy).is_none());
    }
}
