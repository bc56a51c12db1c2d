//! Disambiguation (component I): detect concepts sharing a canonical label
//! but referring to distinct senses, gate the split behind an LLM
//! separability check, and emit a synthetic split with support conserved.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DisambiguationPolicy;
use crate::error::{Error, Result};
use crate::llm::{call_with_retry, LlmClient, Prompt};
use crate::observability::CounterRegistry;
use crate::types::{Concept, Rationale, SplitOp, SupportStats};

fn tokenize(s: &str) -> Vec<String> {
    s.split_whitespace().map(|t| t.to_lowercase()).collect()
}

fn jaccard<T: Ord + Clone>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// One snippet of surrounding text extracted for a supporting record.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    /// Identifier of the source record this window came from (e.g. fingerprint).
    pub source_id: String,
    /// Window tokens, lowercased.
    pub tokens: Vec<String>,
}

/// Locate occurrences of `canonical_label`'s token sequence within `text` and
/// emit one unique window of `±window_size/2` tokens per match; falls back to
/// the first `window_size` tokens of the record when there is no match.
#[must_use]
pub fn extract_context_window(source_id: &str, text: &str, canonical_label: &str, window_size: usize) -> Vec<ContextWindow> {
    let tokens = tokenize(text);
    let needle = tokenize(canonical_label);
    if needle.is_empty() || tokens.is_empty() {
        return Vec::new();
    }
    let half = (window_size / 2).max(1);
    let mut windows = Vec::new();
    let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();

    if tokens.len() >= needle.len() {
        for start in 0..=(tokens.len() - needle.len()) {
            if tokens[start..start + needle.len()] == needle[..] {
                let lo = start.saturating_sub(half);
                let hi = (start + needle.len() + half).min(tokens.len());
                let window = tokens[lo..hi].to_vec();
                if seen.insert(window.clone()) {
                    windows.push(ContextWindow { source_id: source_id.to_string(), tokens: window });
                }
            }
        }
    }

    if windows.is_empty() {
        let hi = window_size.min(tokens.len());
        windows.push(ContextWindow { source_id: source_id.to_string(), tokens: tokens[..hi].to_vec() });
    }
    windows
}

/// One group of concepts sharing a canonical label (case-insensitively),
/// scored for how likely they represent genuinely distinct senses.
#[derive(Debug, Clone)]
pub struct AmbiguityGroup {
    /// Shared lowercase canonical label.
    pub label_key: String,
    /// Member concept ids, in input order.
    pub concept_ids: Vec<String>,
    /// `0.4*parent_divergence + 0.35*context_divergence + 0.25*institution_divergence`.
    pub score: f64,
}

/// Per-concept evidence needed to score ambiguity: the institutions backing
/// it and the context-token windows extracted from its supporting records.
/// Concepts themselves don't retain this (support is aggregated to counts by
/// S2), so callers thread it through separately from whatever stage last
/// held per-record detail.
#[derive(Debug, Clone, Default)]
pub struct ConceptEvidence {
    /// Institution names backing this concept.
    pub institutions: BTreeSet<String>,
    /// Context windows extracted from its supporting records.
    pub contexts: Vec<ContextWindow>,
}

fn pairwise_mean<T>(ids: &[String], f: impl Fn(&str, &str) -> T) -> Vec<T> {
    let mut out = Vec::new();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            out.push(f(&ids[i], &ids[j]));
        }
    }
    out
}

fn context_overlap(a: &[ContextWindow], b: &[ContextWindow]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut scores = Vec::new();
    for wa in a {
        for wb in b {
            let sa: BTreeSet<String> = wa.tokens.iter().cloned().collect();
            let sb: BTreeSet<String> = wb.tokens.iter().cloned().collect();
            scores.push(jaccard(&sa, &sb));
        }
    }
    mean(&scores)
}

/// Groups `concepts` by lowercase canonical label, scores each group of size
/// >=2 per spec's weighted divergence formula, drops groups scoring <=0 or
/// below `policy.min_ambiguity_score`, and sorts survivors by descending
/// score.
#[must_use]
pub fn detect_ambiguity_groups(concepts: &[Concept], evidence: &BTreeMap<String, ConceptEvidence>, policy: &DisambiguationPolicy) -> Vec<AmbiguityGroup> {
    let mut by_label: BTreeMap<String, Vec<&Concept>> = BTreeMap::new();
    for c in concepts {
        by_label.entry(c.canonical_label.to_lowercase()).or_default().push(c);
    }

    let mut groups = Vec::new();
    for (label_key, members) in by_label {
        if members.len() < 2 {
            continue;
        }
        if policy.require_distinct_parents {
            let parent_sets: Vec<BTreeSet<&String>> = members.iter().map(|c| c.parents.iter().collect()).collect();
            let all_equal = parent_sets.windows(2).all(|w| w[0] == w[1]);
            if all_equal {
                continue;
            }
        }

        let ids: Vec<String> = members.iter().map(|c| c.id.clone()).collect();
        let empty = ConceptEvidence::default();

        let parent_divs = pairwise_mean(&ids, |a, b| {
            let ca = members.iter().find(|c| c.id == a).unwrap();
            let cb = members.iter().find(|c| c.id == b).unwrap();
            let pa: BTreeSet<&String> = ca.parents.iter().collect();
            let pb: BTreeSet<&String> = cb.parents.iter().collect();
            1.0 - jaccard(&pa, &pb)
        });
        let context_divs = pairwise_mean(&ids, |a, b| {
            let ea = evidence.get(a).unwrap_or(&empty);
            let eb = evidence.get(b).unwrap_or(&empty);
            1.0 - context_overlap(&ea.contexts, &eb.contexts)
        });
        let institution_divs = pairwise_mean(&ids, |a, b| {
            let ea = evidence.get(a).unwrap_or(&empty);
            let eb = evidence.get(b).unwrap_or(&empty);
            1.0 - jaccard(&ea.institutions, &eb.institutions)
        });

        let score = 0.4 * mean(&parent_divs) + 0.35 * mean(&context_divs) + 0.25 * mean(&institution_divs);
        if score <= 0.0 || score < policy.min_ambiguity_score {
            continue;
        }
        groups.push(AmbiguityGroup { label_key, concept_ids: ids, score });
    }

    groups.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.label_key.cmp(&b.label_key)));
    groups
}

/// One proposed sense returned by the `taxonomy.disambiguate` prompt.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SenseProposal {
    /// Human-readable sense label (e.g. "biology department" vs "course title").
    pub label: String,
    /// Supporting evidence-index references; used only for its count.
    #[serde(default)]
    pub evidence_indices: Vec<usize>,
    /// Optional hint about which original concept this sense belongs under.
    #[serde(default)]
    pub parent_hint: Option<String>,
}

/// Parsed `taxonomy.disambiguate` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeparabilityVerdict {
    /// Proposed senses.
    pub senses: Vec<SenseProposal>,
    /// Whether the model judges the group actually separable.
    pub separable: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-text justification.
    pub reason: String,
}

fn parse_disambiguate_response(payload: &serde_json::Value) -> Result<SeparabilityVerdict> {
    serde_json::from_value(payload.clone()).map_err(|e| Error::Input(format!("taxonomy.disambiguate response did not match the expected shape: {e}")))
}

/// Calls `taxonomy.disambiguate` with the group's metadata and up to
/// `max_contexts_for_prompt` summarized contexts, returning the parsed
/// verdict. A terminal LLM failure defers the group (the caller marks
/// `disambiguation=false`) rather than propagating.
pub fn check_separability(client: &dyn LlmClient, group: &AmbiguityGroup, summarized_contexts: &[String], policy: &DisambiguationPolicy) -> Result<SeparabilityVerdict> {
    let contexts: Vec<&String> = summarized_contexts.iter().take(policy.max_contexts_for_prompt).collect();
    let variables = serde_json::json!({
        "label": group.label_key,
        "concept_ids": group.concept_ids,
        "contexts": contexts,
    });
    let mut parsed: Option<SeparabilityVerdict> = None;
    call_with_retry(client, Prompt::Disambiguate, variables, 1, |payload| {
        let verdict = parse_disambiguate_response(payload)?;
        parsed = Some(verdict);
        Ok(())
    })?;
    parsed.ok_or_else(|| Error::Input("taxonomy.disambiguate returned no parseable verdict".into()))
}

fn hex12_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

/// Distribute `total` across `weights` (already non-negative) by rounding
/// each proportional share, then iteratively rebalancing the largest/
/// smallest shares until the sum matches `total` exactly.
fn distribute(total: u64, weights: &[f64]) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let weight_sum: f64 = weights.iter().sum();
    let mut shares: Vec<u64> = if weight_sum <= 0.0 {
        let even = total / weights.len() as u64;
        vec![even; weights.len()]
    } else {
        weights.iter().map(|w| ((w / weight_sum) * total as f64).round() as u64).collect()
    };

    let mut sum: i64 = shares.iter().sum::<u64>() as i64;
    let mut diff = total as i64 - sum;
    let mut idx = 0usize;
    while diff != 0 && !shares.is_empty() {
        let i = idx % shares.len();
        if diff > 0 {
            shares[i] += 1;
            diff -= 1;
        } else if shares[i] > 0 {
            shares[i] -= 1;
            diff += 1;
        }
        idx += 1;
        if idx > shares.len() * (total as usize + 1) {
            break;
        }
    }
    sum = shares.iter().sum::<u64>() as i64;
    debug_assert_eq!(sum, total as i64);
    shares
}

/// Splits `members` of a group, per `verdict`'s senses, into new concepts
/// with support redistributed by per-sense evidence weight (rounded, then
/// rebalanced to conserve totals), plus the audit [`SplitOp`]. Fails if the
/// verdict isn't actually separable or lacks >=2 senses — callers should
/// check [`SeparabilityVerdict::separable`] and sense count before calling.
pub fn split_group(source_id: &str, members: &[Concept], verdict: &SeparabilityVerdict, policy: &DisambiguationPolicy, now: DateTime<Utc>) -> Result<(Vec<Concept>, SplitOp)> {
    if !verdict.separable || verdict.senses.len() < 2 || verdict.confidence < policy.min_evidence_strength {
        return Err(Error::Input("disambiguation verdict does not authorize a split".into()));
    }
    let primary = members.first().ok_or_else(|| Error::Input("cannot split an empty concept group".into()))?;

    let merged_aliases: BTreeSet<String> = members.iter().flat_map(|c| c.aliases.iter().cloned()).collect();
    let merged_canonicals: BTreeSet<String> = members.iter().map(|c| c.canonical_label.clone()).collect();
    let total_support = members.iter().fold(SupportStats::default(), |acc, c| acc.merge(&c.support));

    let weights: Vec<f64> = verdict.senses.iter().map(|s| s.evidence_indices.len().max(1) as f64).collect();
    let records = distribute(total_support.records, &weights);
    let counts = distribute(total_support.count, &weights);
    let institutions_final: Vec<u64> = if total_support.institutions == 0 {
        vec![0; verdict.senses.len()]
    } else {
        distribute(total_support.institutions, &weights).into_iter().map(|v| v.max(1)).collect()
    };

    let mut new_ids = Vec::new();
    let mut new_concepts = Vec::new();
    let mut evidence: BTreeMap<String, serde_json::Value> = BTreeMap::new();

    for (idx, sense) in verdict.senses.iter().enumerate() {
        let new_id = format!("{source_id}::split::{}", hex12_sha256(&format!("{source_id}{idx}")));
        new_ids.push(new_id.clone());

        let parent_source = sense
            .parent_hint
            .as_ref()
            .and_then(|hint| members.iter().find(|c| c.canonical_label.to_lowercase().contains(&hint.to_lowercase())))
            .unwrap_or(primary);

        let canonical_label = if sense.label.to_lowercase().contains(&primary.canonical_label.to_lowercase()) {
            sense.label.clone()
        } else {
            format!("{} - {}", primary.canonical_label, sense.label)
        };

        let mut aliases: BTreeSet<String> = merged_aliases.clone();
        aliases.extend(merged_canonicals.iter().cloned());
        aliases.insert(sense.label.clone());
        aliases.remove(&canonical_label);
        let mut aliases: Vec<String> = aliases.into_iter().collect();
        aliases.sort();

        let support = SupportStats { records: records[idx], institutions: institutions_final[idx], count: counts[idx] };

        let mut rationale = Rationale::default();
        rationale.passed_gates.insert("disambiguation".to_string(), true);
        rationale.reasons.push(format!("split from group '{}' sense '{}': {}", source_id, sense.label, verdict.reason));
        rationale.thresholds.insert("min_evidence_strength".to_string(), policy.min_evidence_strength.into());

        let concept = Concept::new(new_id.clone(), primary.level, canonical_label, parent_source.parents.clone(), aliases, support, rationale)?;
        new_concepts.push(concept);

        evidence.insert(
            new_id,
            serde_json::json!({
                "sense": sense.label,
                "confidence": verdict.confidence,
                "evidence_indices": sense.evidence_indices,
            }),
        );
    }

    let operation_id = format!("split::{source_id}");
    let split_op = SplitOp::new(operation_id, source_id, new_ids, "llm-separability".to_string(), Some(evidence), now)?;

    Ok((new_concepts, split_op))
}

/// Runs ambiguity detection, LLM separability gating, and splitting over
/// `concepts`, incrementing `Disambig` phase counters. Groups the LLM judges
/// inseparable (or fails to check) are returned unchanged with their
/// rationale gate set to `false`.
pub struct DisambiguationProcessor<'a> {
    policy: &'a DisambiguationPolicy,
    counters: &'a CounterRegistry,
}

impl<'a> DisambiguationProcessor<'a> {
    /// Construct a processor bound to `policy`.
    #[must_use]
    pub fn new(policy: &'a DisambiguationPolicy, counters: &'a CounterRegistry) -> Self {
        Self { policy, counters }
    }

    /// Process one batch, returning the surviving/split concept set plus any
    /// [`SplitOp`]s applied.
    pub fn process(
        &self,
        client: &dyn LlmClient,
        concepts: Vec<Concept>,
        evidence: &BTreeMap<String, ConceptEvidence>,
        now: DateTime<Utc>,
    ) -> (Vec<Concept>, Vec<SplitOp>) {
        let groups = detect_ambiguity_groups(&concepts, evidence, self.policy);
        let _ = self.counters.increment("Disambig", "collisions_detected", groups.len() as i64);

        let mut by_id: BTreeMap<String, Concept> = concepts.into_iter().map(|c| (c.id.clone(), c)).collect();
        let mut split_ops = Vec::new();

        for group in &groups {
            let members: Vec<Concept> = group.concept_ids.iter().filter_map(|id| by_id.get(id).cloned()).collect();
            if members.len() < 2 {
                continue;
            }
            let empty = ConceptEvidence::default();
            let summarized: Vec<String> = group
                .concept_ids
                .iter()
                .flat_map(|id| evidence.get(id).unwrap_or(&empty).contexts.iter().map(|w| w.tokens.join(" ")))
                .collect();

            let source_id = group.concept_ids.join("+");
            match check_separability(client, group, &summarized, self.policy) {
                Ok(verdict) if verdict.separable && verdict.senses.len() >= 2 && verdict.confidence >= self.policy.min_evidence_strength => {
                    match split_group(&source_id, &members, &verdict, self.policy, now) {
                        Ok((new_concepts, op)) => {
                            for id in &group.concept_ids {
                                by_id.remove(id);
                            }
                            for c in new_concepts {
                                by_id.insert(c.id.clone(), c);
                            }
                            let _ = self.counters.increment("Disambig", "splits_made", 1);
                            split_ops.push(op);
                        }
                        Err(_) => {
                            self.defer(&mut by_id, &group.concept_ids);
                        }
                    }
                }
                _ => {
                    self.defer(&mut by_id, &group.concept_ids);
                }
            }
        }

        let mut out: Vec<Concept> = by_id.into_values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        split_ops.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));
        (out, split_ops)
    }

    fn defer(&self, by_id: &mut BTreeMap<String, Concept>, ids: &[String]) {
        let _ = self.counters.increment("Disambig", "deferred", 1);
        for id in ids {
            if let Some(c) = by_id.get_mut(id) {
                c.rationale.passed_gates.insert("disambiguation".to_string(), false);
                c.rationale.reasons.push("disambiguation deferred: group not judged separable".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rationale;

    fn concept(id: &str, label: &str, parents: Vec<&str>, institutions: u64) -> Concept {
        Concept::new(
            id,
            if parents.is_empty() { 0 } else { 1 },
            label,
            parents.into_iter().map(String::from).collect(),
            vec![],
            SupportStats { records: 2, institutions, count: 2 },
            Rationale::default(),
        )
        .unwrap()
    }

    #[test]
    fn extract_context_window_falls_back_when_no_match() {
        let windows = extract_context_window("r1", "unrelated passage about other topics", "biology", 6);
        assert_eq!(windows.len(), 1);
        assert!(!windows[0].tokens.is_empty());
    }

    #[test]
    fn extract_context_window_centers_on_match() {
        let windows = extract_context_window("r1", "the school of biology offers many courses in the area", "biology", 4);
        assert_eq!(windows.len(), 1);
        assert!(windows[0].tokens.contains(&"biology".to_string()));
    }

    #[test]
    fn detect_ambiguity_groups_finds_shared_label_with_diverging_parents() {
        let concepts = vec![concept("a", "Biology", vec!["p1"], 1), concept("b", "Biology", vec!["p2"], 1)];
        let mut evidence = BTreeMap::new();
        evidence.insert("a".to_string(), ConceptEvidence { institutions: BTreeSet::from(["MIT".to_string()]), contexts: vec![] });
        evidence.insert("b".to_string(), ConceptEvidence { institutions: BTreeSet::from(["Stanford".to_string()]), contexts: vec![] });
        let policy = DisambiguationPolicy::default();
        let groups = detect_ambiguity_groups(&concepts, &evidence, &policy);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].score > 0.0);
    }

    #[test]
    fn distribute_conserves_total_with_uneven_weights() {
        let shares = distribute(7, &[1.0, 2.0, 4.0]);
        assert_eq!(shares.iter().sum::<u64>(), 7);
        assert_eq!(shares.len(), 3);
    }

    #[test]
    fn split_group_rejects_inseparable_verdict() {
        let members = vec![concept("a", "Biology", vec!["p1"], 1), concept("b", "Biology", vec!["p2"], 1)];
        let verdict = SeparabilityVerdict { senses: vec![], separable: false, confidence: 0.0, reason: "not separable".into() };
        let policy = DisambiguationPolicy::default();
        let result = split_group("a+b", &members, &verdict, &policy, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn split_group_conserves_support_across_senses() {
        let members = vec![concept("a", "Biology", vec!["p1"], 2), concept("b", "Biology", vec!["p2"], 2)];
        let verdict = SeparabilityVerdict {
            senses: vec![
                SenseProposal { label: "Department".into(), evidence_indices: vec![0, 1], parent_hint: Some("p1".into()) },
                SenseProposal { label: "Course".into(), evidence_indices: vec![2], parent_hint: Some("p2".into()) },
            ],
            separable: true,
            confidence: 0.9,
            reason: "distinct contexts".into(),
        };
        let policy = DisambiguationPolicy::default();
        let (new_concepts, op) = split_group("a+b", &members, &verdict, &policy, Utc::now()).unwrap();
        assert_eq!(new_concepts.len(), 2);
        assert_eq!(op.new_ids.len(), 2);
        let total_records: u64 = new_concepts.iter().map(|c| c.support.records).sum();
        assert_eq!(total_records, 4);
    }
}
