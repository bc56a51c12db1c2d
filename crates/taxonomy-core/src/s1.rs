//! S1: LLM-assisted candidate extraction, canonical normalization, and
//! parent anchoring (component E).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::config::ExtractionNormalizationPolicy;
use crate::error::{Error, Result};
use crate::llm::{call_with_retry, LlmClient, Prompt};
use crate::normalize::{ratcliff_obershelp, to_canonical_form, AcronymTable};
use crate::observability::CounterRegistry;
use crate::types::SourceRecord;

/// One extractor-proposed candidate, as returned by the `taxonomy.extract` prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExtractedItem {
    label: String,
    #[serde(default)]
    normalized: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    parents: Vec<String>,
}

fn parse_extract_response(payload: &serde_json::Value) -> Result<Vec<ExtractedItem>> {
    let items: Vec<ExtractedItem> = serde_json::from_value(payload.clone())
        .map_err(|e| Error::Input(format!("taxonomy.extract response did not match the expected array shape: {e}")))?;
    let mut kept: Vec<ExtractedItem> = items
        .into_iter()
        .filter(|i| !i.label.trim().is_empty() && i.normalized.as_deref().is_some_and(|n| !n.trim().is_empty()))
        .collect();
    kept.sort_by(|a, b| a.normalized.as_deref().unwrap_or("").to_lowercase().cmp(&b.normalized.as_deref().unwrap_or("").to_lowercase()));
    Ok(kept)
}

/// Calls the `taxonomy.extract` prompt for `record` at `level`, returning the
/// filtered, deterministically sorted list of extracted items. Retries on
/// schema-validation failure per `policy.max_retries`; provider errors retry
/// only when flagged retryable; a final failure becomes [`Error::Quarantine`].
pub fn extract(
    client: &dyn LlmClient,
    record: &SourceRecord,
    level: u8,
    policy: &ExtractionNormalizationPolicy,
) -> Result<Vec<ExtractedItem>> {
    let variables = serde_json::json!({
        "institution": record.provenance.institution,
        "level": level,
        "source_text": record.text,
        "metadata": record.meta.hints,
    });
    let mut parsed: Option<Vec<ExtractedItem>> = None;
    let result = call_with_retry(client, Prompt::Extract, variables, policy.max_retries, |payload| {
        let items = parse_extract_response(payload)?;
        parsed = Some(items);
        Ok(())
    });
    match result {
        Ok(_) => Ok(parsed.unwrap_or_default()),
        Err(Error::LlmProvider { retryable: false, message }) => {
            Err(Error::Quarantine { attempts: policy.max_retries + 1, reason: message })
        }
        Err(e) => Err(Error::Quarantine { attempts: policy.max_retries + 1, reason: e.to_string() }),
    }
}

/// sha1 fingerprint of a record's normalized text, institution, and URL, used
/// to track unique supporting evidence through S2's near-duplicate collapse.
#[must_use]
pub fn record_fingerprint(record: &SourceRecord) -> String {
    let normalized_text = record.text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let url = record.provenance.url.clone().unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(normalized_text.as_bytes());
    hasher.update(b"|");
    hasher.update(record.provenance.institution.as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// A candidate proposal ready for bucket aggregation: one extracted item,
/// normalized and attached to one supporting record's evidence.
#[derive(Debug, Clone)]
pub struct NormalizedCandidate {
    /// Canonicalized label.
    pub normalized: String,
    /// Original surface label.
    pub label: String,
    /// Ordered-unique union of raw/returned/kernel aliases.
    pub aliases: Vec<String>,
    /// Resolved (or `UNRESOLVED:<anchor>`-tagged) parent anchors.
    pub parents: Vec<String>,
    /// Fingerprint of the supporting record.
    pub fingerprint: String,
    /// Supporting institution.
    pub institution: String,
}

/// Normalizes one extractor item against `record`'s level and the kernel
/// canonical-form pipeline. Returns `None` when the canonical length falls
/// outside the level's label-policy bounds.
#[must_use]
pub fn normalize_item(
    item: &ExtractedItem,
    record: &SourceRecord,
    level: u8,
    policy: &ExtractionNormalizationPolicy,
    acronyms: &AcronymTable,
) -> Option<NormalizedCandidate> {
    let kernel = to_canonical_form(&item.label, level, acronyms, false);
    let bounds = &policy.label_policy[level as usize];
    let len = kernel.canonical.chars().count();
    if len < bounds.min_length || len > bounds.max_length {
        return None;
    }

    let mut aliases: Vec<String> = Vec::new();
    aliases.push(item.label.clone());
    if let Some(n) = &item.normalized {
        aliases.push(n.clone());
    }
    aliases.extend(item.aliases.iter().cloned());
    aliases.extend(kernel.aliases.iter().cloned());
    aliases.retain(|a| !a.trim().is_empty() && a.to_lowercase() != kernel.canonical.to_lowercase());
    aliases.sort();
    aliases.dedup();

    Some(NormalizedCandidate {
        normalized: kernel.canonical,
        label: item.label.clone(),
        aliases,
        parents: item.parents.clone(),
        fingerprint: record_fingerprint(record),
        institution: record.provenance.institution.clone(),
    })
}

/// A previously emitted candidate or concept available as a parent anchor.
#[derive(Debug, Clone)]
pub struct ParentEntry {
    /// Stable identifier (candidate's normalized form, or concept id).
    pub identifier: String,
    /// Hierarchy level.
    pub level: u8,
    /// Canonical label.
    pub canonical: String,
    /// Known aliases.
    pub aliases: Vec<String>,
}

/// Maps `canonical|alias -> [ParentEntry]` for levels below the target level,
/// supporting exact and fuzzy anchor resolution (spec §4.E).
#[derive(Debug, Default)]
pub struct ParentIndex {
    by_key: BTreeMap<String, Vec<ParentEntry>>,
}

impl ParentIndex {
    /// Build an index from the given entries (typically all candidates/concepts
    /// emitted for levels below the target level).
    #[must_use]
    pub fn build(entries: Vec<ParentEntry>) -> Self {
        let mut by_key: BTreeMap<String, Vec<ParentEntry>> = BTreeMap::new();
        for entry in entries {
            by_key.entry(entry.canonical.to_lowercase()).or_default().push(entry.clone());
            for alias in &entry.aliases {
                by_key.entry(alias.to_lowercase()).or_default().push(entry.clone());
            }
        }
        Self { by_key }
    }

    /// Resolve anchor `a` against entries with `level < target_level`.
    ///
    /// 1. Canonicalize `a` at `max(target_level - 1, 0)`.
    /// 2. Exact-match keys with at least one entry below `target_level`.
    /// 3. Otherwise fuzzy-match the top-3 closest keys by Ratcliff-Obershelp
    ///    similarity, requiring `>= parent_similarity_cutoff`.
    ///
    /// Returns `UNRESOLVED:<anchor>` when nothing matches.
    #[must_use]
    pub fn resolve(&self, anchor: &str, target_level: u8, acronyms: &AcronymTable, cutoff: f64) -> String {
        let parent_level = target_level.saturating_sub(1);
        let canonical = to_canonical_form(anchor, parent_level, acronyms, false).canonical;
        let key = canonical.to_lowercase();

        if let Some(entries) = self.by_key.get(&key) {
            if let Some(entry) = entries.iter().find(|e| e.level < target_level) {
                return entry.identifier.clone();
            }
        }

        let mut scored: Vec<(f64, &String, &ParentEntry)> = self
            .by_key
            .iter()
            .filter_map(|(k, entries)| entries.iter().find(|e| e.level < target_level).map(|e| (k, e)))
            .map(|(k, e)| (ratcliff_obershelp(&key, k), k, e))
            .filter(|(score, _, _)| *score >= cutoff)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.1.cmp(b.1)));
        scored.truncate(3);

        if let Some((_, _, entry)) = scored.first() {
            entry.identifier.clone()
        } else {
            format!("UNRESOLVED:{anchor}")
        }
    }
}

/// A bucket of raw evidence for one `(level, normalized, parents)` key,
/// retaining per-institution fingerprint sets so S2 can perform institution
/// resolution and near-duplicate record collapse before committing to a
/// final [`crate::types::SupportStats`].
#[derive(Debug, Clone)]
pub struct CandidateBucket {
    /// Hierarchy level.
    pub level: u8,
    /// Representative surface label (first one seen in sort order).
    pub label: String,
    /// Canonical form.
    pub normalized: String,
    /// Resolved parent anchors (empty iff level 0).
    pub parents: Vec<String>,
    /// Ordered-unique union of aliases across all contributing occurrences.
    pub aliases: Vec<String>,
    /// Raw institution name -> fingerprints of the records supporting this bucket.
    pub institutions: BTreeMap<String, BTreeSet<String>>,
}

impl CandidateBucket {
    /// Total occurrence count across all institutions (pre near-dup collapse).
    #[must_use]
    pub fn raw_count(&self) -> u64 {
        self.institutions.values().map(|f| f.len() as u64).sum()
    }
}

/// Aggregates normalized candidates by `(normalized, resolved-parents-tuple)`
/// into one [`CandidateBucket`] per key, merging aliases and institution
/// fingerprint sets. Level 0 forces empty parents regardless of resolved
/// anchors. The bucket stream is consumed by S2, which applies institution
/// resolution, near-duplicate collapse, and frequency thresholds.
pub struct S1Processor<'a> {
    counters: &'a CounterRegistry,
}

impl<'a> S1Processor<'a> {
    /// Construct a processor bound to the given counter sink.
    #[must_use]
    pub fn new(counters: &'a CounterRegistry) -> Self {
        Self { counters }
    }

    /// Aggregate `candidates` (already normalized, with parents resolved) at
    /// `level` into buckets, sorted by normalized form for determinism.
    pub fn aggregate(&self, level: u8, candidates: Vec<NormalizedCandidate>) -> Vec<CandidateBucket> {
        let _ = self.counters.increment("S1", "records_in", candidates.len() as i64);
        let mut buckets: BTreeMap<(String, Vec<String>), CandidateBucket> = BTreeMap::new();

        for candidate in candidates {
            let parents = if level == 0 { Vec::new() } else { candidate.parents.clone() };
            let key = (candidate.normalized.clone(), parents.clone());
            let bucket = buckets.entry(key).or_insert_with(|| CandidateBucket {
                level,
                label: candidate.label.clone(),
                normalized: candidate.normalized.clone(),
                parents: parents.clone(),
                aliases: Vec::new(),
                institutions: BTreeMap::new(),
            });
            bucket.aliases.extend(candidate.aliases.iter().cloned());
            bucket.institutions.entry(candidate.institution).or_default().insert(candidate.fingerprint);
        }

        let mut out: Vec<CandidateBucket> = buckets.into_values().collect();
        for bucket in &mut out {
            bucket.aliases.sort();
            bucket.aliases.dedup();
        }
        out.sort_by(|a, b| a.normalized.cmp(&b.normalized));
        let _ = self.counters.increment("S1", "candidates_out", out.len() as i64);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::types::{Provenance, SourceMeta};

    fn record(text: &str, institution: &str) -> SourceRecord {
        SourceRecord::new(
            text,
            Provenance::new(institution, Some("https://example.edu/x".into()), None, Utc::now()).unwrap(),
            SourceMeta::default(),
        )
        .unwrap()
    }

    #[test]
    fn parse_extract_response_drops_empty_entries_and_sorts() {
        let payload = serde_json::json!([
            {"label": "Engineering", "normalized": "engineering", "aliases": [], "parents": []},
            {"label": "", "normalized": "x", "aliases": [], "parents": []},
            {"label": "Arts", "normalized": "arts", "aliases": [], "parents": []},
        ]);
        let items = parse_extract_response(&payload).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].normalized.as_deref(), Some("arts"));
    }

    #[test]
    fn record_fingerprint_is_stable_for_equivalent_text() {
        let a = record("Computer   Science", "MIT");
        let b = record("computer science", "MIT");
        assert_eq!(record_fingerprint(&a), record_fingerprint(&b));
    }

    #[test]
    fn normalize_item_rejects_out_of_bounds_length() {
        let item = ExtractedItem { label: "A".into(), normalized: Some("a".into()), aliases: vec![], parents: vec![] };
        let rec = record("A", "MIT");
        let policy = ExtractionNormalizationPolicy::default();
        let acronyms = AcronymTable::default();
        assert!(normalize_item(&item, &rec, 0, &policy, &acronyms).is_none());
    }

    #[test]
    fn parent_index_resolves_exact_match() {
        let entries = vec![ParentEntry { identifier: "c1".into(), level: 0, canonical: "engineering".into(), aliases: vec![] }];
        let index = ParentIndex::build(entries);
        let acronyms = AcronymTable::default();
        let resolved = index.resolve("Engineering", 1, &acronyms, 0.6);
        assert_eq!(resolved, "c1");
    }

    #[test]
    fn parent_index_falls_back_to_unresolved() {
        let index = ParentIndex::build(vec![]);
        let acronyms = AcronymTable::default();
        let resolved = index.resolve("Quantum Biology", 1, &acronyms, 0.6);
        assert_eq!(resolved, "UNRESOLVED:Quantum Biology");
    }

    #[test]
    fn aggregate_merges_by_normalized_and_parents() {
        let counters = CounterRegistry::new(None);
        let processor = S1Processor::new(&counters);
        let a = NormalizedCandidate {
            normalized: "engineering".into(),
            label: "Engineering".into(),
            aliases: vec!["Eng".into()],
            parents: vec![],
            fingerprint: "fp1".into(),
            institution: "MIT".into(),
        };
        let b = NormalizedCandidate {
            normalized: "engineering".into(),
            label: "Engineering".into(),
            aliases: vec![],
            parents: vec![],
            fingerprint: "fp2".into(),
            institution: "Stanford".into(),
        };
        let out = processor.aggregate(0, vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].institutions.len(), 2);
        assert_eq!(out[0].raw_count(), 2);
    }
}
