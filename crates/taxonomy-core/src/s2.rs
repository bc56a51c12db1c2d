//! S2: frequency filtering (component F).
//!
//! Resolves raw institution names to canonical ones, collapses
//! near-duplicate supporting records, re-aggregates by
//! `(level, canonical_lower, parents_tuple_lower)`, and applies per-level
//! `min_institutions`/`min_src_count` thresholds to split candidates into
//! kept and dropped streams, each carrying a [`Rationale`].

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::config::FrequencyPolicy;
use crate::observability::CounterRegistry;
use crate::s1::CandidateBucket;
use crate::types::{Candidate, Rationale, SupportStats};

fn nfkd_fold(s: &str) -> String {
    s.nfkd().filter(|c| !unicode_normalization::char::is_combining_mark(*c)).collect::<String>().to_lowercase()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a raw institution name to a canonical one.
///
/// Normalizes (NFKD fold, lower, whitespace collapse), then checks
/// `mapping` for an exact hit; otherwise applies `rule`:
/// - `prefer-campus`: title-cased full (normalized) name.
/// - `prefer-system`: strips a trailing campus qualifier after `,` or ` at `.
/// - `merge`: returns the normalized name unchanged (callers merge across campuses).
///
/// An empty/whitespace-only name resolves to the stable placeholder
/// `"unknown-institution"`.
#[must_use]
pub fn resolve_institution(raw: &str, rule: &str, mapping: &BTreeMap<String, String>) -> String {
    let folded = collapse_whitespace(&nfkd_fold(raw));
    if folded.is_empty() {
        return "unknown-institution".to_string();
    }
    if let Some(canonical) = mapping.get(&folded) {
        return canonical.clone();
    }
    match rule {
        "prefer-system" => {
            let cut = folded.find(", ").or_else(|| folded.find(" at ")).unwrap_or(folded.len());
            title_case(&folded[..cut])
        }
        "merge" => folded,
        _ => title_case(&folded),
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

static DELIMS: &[char] = &[':', '#', '@'];

thread_local! {
    static NUMERIC_SUFFIX: Regex = Regex::new(r"[-_]?v?\d+$").unwrap();
    static HEX_SUFFIX: Regex = Regex::new(r"[-_][0-9a-f]{6,}$").unwrap();
}

fn fingerprint_class(fingerprint: &str, min_prefix_length: usize, strip_numeric_suffix: bool) -> Option<String> {
    let mut prefix = fingerprint;
    for (idx, c) in fingerprint.char_indices() {
        if DELIMS.contains(&c) {
            prefix = &fingerprint[..idx];
            break;
        }
    }
    if prefix.chars().count() < min_prefix_length {
        return None;
    }
    let mut class = prefix.to_string();
    if strip_numeric_suffix {
        class = NUMERIC_SUFFIX.with(|re| re.replace(&class, "").to_string());
        class = HEX_SUFFIX.with(|re| re.replace(&class, "").to_string());
    }
    Some(class)
}

/// Collapse `fingerprints` whose shared prefix (before any of `:`, `#`, `@`)
/// is at least `min_prefix_length` long into equivalence classes, retaining
/// the lexicographically smallest survivor per class. Fingerprints whose
/// prefix is too short to classify always survive individually.
#[must_use]
pub fn collapse_near_duplicates(fingerprints: &BTreeSet<String>, min_prefix_length: usize, strip_numeric_suffix: bool) -> BTreeSet<String> {
    let mut classes: BTreeMap<String, String> = BTreeMap::new();
    let mut unclassified: BTreeSet<String> = BTreeSet::new();

    for fp in fingerprints {
        match fingerprint_class(fp, min_prefix_length, strip_numeric_suffix) {
            Some(class) => {
                classes
                    .entry(class)
                    .and_modify(|survivor| {
                        if fp < survivor {
                            *survivor = fp.clone();
                        }
                    })
                    .or_insert_with(|| fp.clone());
            }
            None => {
                unclassified.insert(fp.clone());
            }
        }
    }

    let mut survivors: BTreeSet<String> = classes.into_values().collect();
    survivors.extend(unclassified);
    survivors
}

/// A frequency-filtered candidate, paired with the rationale behind the
/// keep/drop decision.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The candidate (support already recomputed after collapse).
    pub candidate: Candidate,
    /// Decision trail: threshold values, institution list, pass/fail gates.
    pub rationale: Rationale,
}

/// Applies institution resolution, near-duplicate collapse, re-aggregation,
/// and per-level thresholds to a stream of [`CandidateBucket`]s.
pub struct S2Processor<'a> {
    policy: &'a FrequencyPolicy,
    counters: &'a CounterRegistry,
    institution_mapping: BTreeMap<String, String>,
}

impl<'a> S2Processor<'a> {
    /// Construct a processor bound to `policy`, with an optional canonical
    /// institution-name mapping (normalized-raw -> canonical).
    #[must_use]
    pub fn new(policy: &'a FrequencyPolicy, counters: &'a CounterRegistry, institution_mapping: BTreeMap<String, String>) -> Self {
        Self { policy, counters, institution_mapping }
    }

    /// Process one level's buckets into kept/dropped streams.
    pub fn process(&self, buckets: Vec<CandidateBucket>) -> (Vec<ScoredCandidate>, Vec<ScoredCandidate>) {
        let _ = self.counters.increment("S2", "candidates_in", buckets.len() as i64);

        let mut kept = Vec::new();
        let mut dropped = Vec::new();

        for bucket in buckets {
            let level = bucket.level;
            let threshold = &self.policy.thresholds[level as usize];

            let mut by_institution: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for (raw_institution, fingerprints) in &bucket.institutions {
                let canonical = resolve_institution(raw_institution, &self.policy.institution_rule, &self.institution_mapping);
                by_institution.entry(canonical).or_default().extend(fingerprints.iter().cloned());
            }

            let mut all_collapsed: BTreeSet<String> = BTreeSet::new();
            let mut institution_counts: BTreeMap<String, u64> = BTreeMap::new();
            for (institution, fingerprints) in &by_institution {
                let survivors = collapse_near_duplicates(fingerprints, self.policy.min_prefix_length, self.policy.strip_numeric_suffix);
                institution_counts.insert(institution.clone(), survivors.len() as u64);
                all_collapsed.extend(survivors);
            }

            let support = SupportStats {
                records: all_collapsed.len() as u64,
                institutions: by_institution.len() as u64,
                count: institution_counts.values().sum(),
            };

            let passed = support.institutions >= threshold.min_institutions && support.count >= threshold.min_src_count;

            let mut rationale = Rationale::default();
            rationale.passed_gates.insert("frequency".to_string(), passed);
            rationale
                .thresholds
                .insert("min_institutions".to_string(), (threshold.min_institutions as f64).into());
            rationale.thresholds.insert("min_src_count".to_string(), (threshold.min_src_count as f64).into());
            let institution_list = by_institution.keys().cloned().collect::<Vec<_>>().join(",");
            rationale.reasons.push(format!(
                "support institutions={} count={} threshold_institutions={} threshold_count={} institutions=[{}]",
                support.institutions, support.count, threshold.min_institutions, threshold.min_src_count, institution_list
            ));

            match Candidate::new(level, bucket.label.clone(), bucket.normalized.clone(), bucket.parents.clone(), bucket.aliases.clone(), support) {
                Ok(candidate) => {
                    let scored = ScoredCandidate { candidate, rationale };
                    if passed {
                        let _ = self.counters.increment("S2", "kept", 1);
                        kept.push(scored);
                    } else {
                        let _ = self.counters.increment("S2", "dropped_insufficient_support", 1);
                        dropped.push(scored);
                    }
                }
                Err(e) => {
                    let mut rationale = rationale;
                    rationale.reasons.push(format!("invalid-candidate: {e}"));
                    rationale.passed_gates.insert("frequency".to_string(), false);
                    let _ = self.counters.increment("S2", "dropped_insufficient_support", 1);
                    let placeholder_support = SupportStats::default();
                    if let Ok(candidate) = Candidate::new(level, bucket.label, bucket.normalized, Vec::new(), Vec::new(), placeholder_support) {
                        dropped.push(ScoredCandidate { candidate, rationale });
                    }
                }
            }
        }

        kept.sort_by(|a, b| a.candidate.normalized.cmp(&b.candidate.normalized));
        dropped.sort_by(|a, b| a.candidate.normalized.cmp(&b.candidate.normalized));
        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_institution_prefer_campus_title_cases() {
        let mapping = BTreeMap::new();
        let resolved = resolve_institution("stanford university", "prefer-campus", &mapping);
        assert_eq!(resolved, "Stanford University");
    }

    #[test]
    fn resolve_institution_prefer_system_strips_campus_suffix() {
        let mapping = BTreeMap::new();
        let resolved = resolve_institution("University of California, Berkeley", "prefer-system", &mapping);
        assert_eq!(resolved, "University Of California");
    }

    #[test]
    fn resolve_institution_empty_name_is_placeholder() {
        let mapping = BTreeMap::new();
        assert_eq!(resolve_institution("   ", "prefer-campus", &mapping), "unknown-institution");
    }

    #[test]
    fn collapse_near_duplicates_keeps_smallest_survivor_per_class() {
        let mut set = BTreeSet::new();
        set.insert("abcdef01".to_string());
        set.insert("abcdef02".to_string());
        set.insert("zzzzzzzz".to_string());
        let survivors = collapse_near_duplicates(&set, 6, true);
        assert!(survivors.contains("abcdef01"));
        assert!(!survivors.contains("abcdef02"));
        assert!(survivors.contains("zzzzzzzz"));
    }

    #[test]
    fn process_drops_candidates_below_threshold() {
        let policy = FrequencyPolicy::default();
        let counters = CounterRegistry::new(None);
        let processor = S2Processor::new(&policy, &counters, BTreeMap::new());
        let mut institutions = BTreeMap::new();
        institutions.insert("MIT".to_string(), BTreeSet::from(["fp1".to_string()]));
        let bucket = CandidateBucket {
            level: 0,
            label: "Engineering".into(),
            normalized: "engineering".into(),
            parents: vec![],
            aliases: vec![],
            institutions,
        };
        let (kept, dropped) = processor.process(vec![bucket]);
        assert!(kept.is_empty());
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].rationale.passed_gates["frequency"], false);
    }

    #[test]
    fn process_keeps_candidates_meeting_threshold() {
        let policy = FrequencyPolicy::default();
        let counters = CounterRegistry::new(None);
        let processor = S2Processor::new(&policy, &counters, BTreeMap::new());
        let mut institutions = BTreeMap::new();
        institutions.insert("MIT".to_string(), BTreeSet::from(["fp1".to_string()]));
        institutions.insert("Stanford".to_string(), BTreeSet::from(["fp2".to_string()]));
        let bucket = CandidateBucket {
            level: 0,
            label: "Engineering".into(),
            normalized: "engineering".into(),
            parents: vec![],
            aliases: vec![],
            institutions,
        };
        let (kept, dropped) = processor.process(vec![bucket]);
        assert_eq!(kept.len(), 1);
        assert!(dropped.is_empty());
        assert_eq!(kept[0].candidate.support.institutions, 2);
    }
}
