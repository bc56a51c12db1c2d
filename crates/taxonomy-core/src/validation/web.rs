//! Web validator: searches a pre-built evidence index of [`PageSnapshot`]s
//! for mentions of a concept's canonical label (spec §4.J).

use std::collections::BTreeMap;

use url::Url;

use crate::config::ValidationPolicy;
use crate::types::PageSnapshot;

/// One scored snippet of supporting evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    /// Institution the snippet came from.
    pub institution: String,
    /// Source URL.
    pub url: String,
    /// Extracted text, capped at `snippet_max_length`.
    pub text: String,
    /// Relevance score: label presence + institution mention + authority bonus.
    pub score: f64,
}

/// Outcome of the web validator for one concept.
#[derive(Debug, Clone, PartialEq)]
pub enum WebOutcome {
    /// Retrieval ran and produced a verdict.
    Resolved {
        /// Whether enough snippets were found.
        passed: bool,
        /// Snippets found, sorted by descending score, capped.
        evidence: Vec<Snippet>,
    },
    /// Retrieval timed out, or the index was empty; neither a pass nor a fail.
    Unknown,
}

/// An index over [`PageSnapshot`]s, keyed by institution and domain, built
/// once per run and queried per concept.
#[derive(Debug, Default)]
pub struct EvidenceIndex {
    by_institution: BTreeMap<String, Vec<PageSnapshot>>,
}

fn domain_of(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string))
}

impl EvidenceIndex {
    /// Build an index from `snapshots`.
    #[must_use]
    pub fn build(snapshots: Vec<PageSnapshot>) -> Self {
        let mut by_institution: BTreeMap<String, Vec<PageSnapshot>> = BTreeMap::new();
        for snapshot in snapshots {
            by_institution.entry(snapshot.institution.clone()).or_default().push(snapshot);
        }
        Self { by_institution }
    }

    /// Whether the index holds no snapshots at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_institution.values().all(Vec::is_empty)
    }

    fn snapshots_for(&self, institution: Option<&str>) -> Vec<&PageSnapshot> {
        match institution {
            Some(inst) => self.by_institution.get(inst).into_iter().flatten().collect(),
            None => self.by_institution.values().flatten().collect(),
        }
    }
}

fn is_authoritative(url: &str, authoritative_domains: &[String]) -> bool {
    match domain_of(url) {
        Some(domain) => {
            domain.ends_with(".edu") || domain.ends_with(".gov") || authoritative_domains.iter().any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
        }
        None => false,
    }
}

/// Extract up to `max_snippets` non-overlapping snippets of `max_length`
/// chars, each centered on a distinct occurrence of `needle_lower` in
/// `text`, in order of appearance.
fn extract_snippets(text: &str, needle_lower: &str, max_length: usize, max_snippets: usize) -> Vec<String> {
    if needle_lower.is_empty() || max_snippets == 0 {
        return Vec::new();
    }
    let lower = text.to_lowercase();
    let half = max_length / 2;
    let mut snippets = Vec::new();
    let mut search_from = 0;

    while snippets.len() < max_snippets {
        let Some(found) = lower[search_from..].find(needle_lower) else { break };
        let idx = search_from + found;

        let lo = idx.saturating_sub(half);
        let hi = (idx + needle_lower.len() + half).min(text.len());
        let lo = text.char_indices().find(|(i, _)| *i >= lo).map(|(i, _)| i).unwrap_or(0);
        let hi = text.char_indices().find(|(i, _)| *i >= hi).map(|(i, _)| i).unwrap_or(text.len());
        snippets.push(text[lo..hi.max(lo)].to_string());

        search_from = idx + needle_lower.len();
    }

    snippets
}

/// Search `index` for mentions of `canonical_label`, optionally scoped to
/// `institution`. Returns [`WebOutcome::Unknown`] when `timed_out` is set or
/// the index holds no snapshots at all; otherwise scores and ranks matching
/// snippets and reports `passed ⇔ |evidence| >= policy.min_snippet_matches`.
#[must_use]
pub fn search(index: &EvidenceIndex, canonical_label: &str, institution: Option<&str>, timed_out: bool, policy: &ValidationPolicy) -> WebOutcome {
    if timed_out || index.is_empty() {
        return WebOutcome::Unknown;
    }

    let needle_lower = canonical_label.to_lowercase();
    let mut snippets = Vec::new();

    for snapshot in index.snapshots_for(institution) {
        let texts = extract_snippets(&snapshot.text, &needle_lower, policy.snippet_max_length, policy.max_snippets_per_snapshot);
        if texts.is_empty() {
            continue;
        }
        let mut score = 1.0;
        if snapshot.text.to_lowercase().contains(&snapshot.institution.to_lowercase()) {
            score += 0.1;
        }
        if is_authoritative(&snapshot.url, &policy.authoritative_domains) {
            score += 0.2;
        }
        for text in texts {
            snippets.push(Snippet { institution: snapshot.institution.clone(), url: snapshot.url.clone(), text, score });
        }
    }

    snippets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.url.cmp(&b.url)));
    snippets.truncate(policy.max_snippets_per_concept);

    let passed = snippets.len() >= policy.min_snippet_matches;
    WebOutcome::Resolved { passed, evidence: snippets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::SnapshotMeta;

    fn snapshot(institution: &str, url: &str, text: &str) -> PageSnapshot {
        PageSnapshot {
            institution: institution.to_string(),
            url: url.to_string(),
            canonical_url: None,
            fetched_at: Utc::now(),
            http_status: 200,
            content_type: "text/html".into(),
            html: None,
            text: text.to_string(),
            lang: Some("en".into()),
            checksum: "deadbeef".into(),
            meta: SnapshotMeta::default(),
        }
    }

    #[test]
    fn empty_index_is_unknown() {
        let index = EvidenceIndex::build(vec![]);
        let outcome = search(&index, "Biology", None, false, &ValidationPolicy::default());
        assert_eq!(outcome, WebOutcome::Unknown);
    }

    #[test]
    fn timeout_is_unknown_even_with_matches() {
        let index = EvidenceIndex::build(vec![snapshot("MIT", "https://mit.edu/biology", "our Biology department is great")]);
        let outcome = search(&index, "Biology", None, true, &ValidationPolicy::default());
        assert_eq!(outcome, WebOutcome::Unknown);
    }

    #[test]
    fn finds_and_scores_authoritative_match() {
        let index = EvidenceIndex::build(vec![snapshot("MIT", "https://mit.edu/biology", "our Biology department is great")]);
        let outcome = search(&index, "Biology", None, false, &ValidationPolicy::default());
        match outcome {
            WebOutcome::Resolved { passed, evidence } => {
                assert!(passed);
                assert_eq!(evidence.len(), 1);
                assert!(evidence[0].score > 1.0);
            }
            WebOutcome::Unknown => panic!("expected a resolved outcome"),
        }
    }

    #[test]
    fn repeated_mentions_in_one_snapshot_yield_multiple_snippets() {
        let index = EvidenceIndex::build(vec![snapshot(
            "MIT",
            "https://mit.edu/biology",
            "Biology is great. Later on, Biology again takes the stage, and once more Biology closes it out.",
        )]);
        let mut policy = ValidationPolicy::default();
        policy.max_snippets_per_snapshot = 2;
        policy.max_snippets_per_concept = 10;
        let outcome = search(&index, "Biology", None, false, &policy);
        match outcome {
            WebOutcome::Resolved { evidence, .. } => assert_eq!(evidence.len(), 2),
            WebOutcome::Unknown => panic!("expected a resolved outcome"),
        }
    }

    #[test]
    fn no_match_fails_below_min_snippets() {
        let index = EvidenceIndex::build(vec![snapshot("MIT", "https://mit.edu/page", "unrelated content entirely")]);
        let outcome = search(&index, "Biology", None, false, &ValidationPolicy::default());
        match outcome {
            WebOutcome::Resolved { passed, evidence } => {
                assert!(!passed);
                assert!(evidence.is_empty());
            }
            WebOutcome::Unknown => panic!("expected a resolved outcome"),
        }
    }
}
