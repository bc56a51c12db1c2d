//! Core data structures shared across pipeline stages.
//!
//! Entities flow forward only: S0 produces [`SourceRecord`]s, S1 produces
//! [`Candidate`]s, and S2 onward produce [`Concept`]s. Construction is validated
//! so an invalid entity can never exist; stages return [`crate::Error::Input`]
//! rather than panicking on malformed data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Where a [`SourceRecord`] or snapshot originated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    /// Institution that published the source. Never empty.
    pub institution: String,
    /// Absolute URL or URI, when applicable.
    pub url: Option<String>,
    /// Section within the source (page title, selector, sheet name).
    pub section: Option<String>,
    /// UTC timestamp the source was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl Provenance {
    /// Construct a `Provenance`, rejecting an empty institution or a non-absolute URL.
    pub fn new(
        institution: impl Into<String>,
        url: Option<String>,
        section: Option<String>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self> {
        let institution = institution.into();
        if institution.trim().is_empty() {
            return Err(Error::Input("provenance.institution must not be empty".into()));
        }
        if let Some(ref u) = url {
            if !(u.starts_with("http://") || u.starts_with("https://") || u.starts_with("file://")) {
                return Err(Error::Input("provenance.url must be an absolute URL or file URI".into()));
            }
        }
        Ok(Self { institution, url, section, fetched_at })
    }
}

/// Metadata attached to a [`SourceRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceMeta {
    /// BCP-47 language tag, lower-cased.
    pub language: String,
    /// Character set used for decoding.
    pub charset: String,
    /// Implementation-specific hints for downstream stages (e.g. `source`, `level`, `block_type`).
    pub hints: BTreeMap<String, String>,
}

impl Default for SourceMeta {
    fn default() -> Self {
        Self { language: "en".into(), charset: "utf-8".into(), hints: BTreeMap::new() }
    }
}

/// Immutable unit of evidence text produced by S0 and consumed by S1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRecord {
    /// Trimmed, non-empty body text.
    pub text: String,
    /// Where this text came from.
    pub provenance: Provenance,
    /// Language/charset/hint metadata.
    pub meta: SourceMeta,
}

impl SourceRecord {
    /// Construct a `SourceRecord`, trimming `text` and rejecting empty content.
    pub fn new(text: impl Into<String>, provenance: Provenance, meta: SourceMeta) -> Result<Self> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(Error::Input("source record text must contain non-whitespace characters".into()));
        }
        Ok(Self { text, provenance, meta })
    }
}

/// Evidence counts backing a [`Candidate`] or [`Concept`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SupportStats {
    /// Number of unique source records supporting the entity.
    pub records: u64,
    /// Number of unique institutions represented in the support.
    pub institutions: u64,
    /// Total frequency count across all supporting records.
    pub count: u64,
}

impl SupportStats {
    /// Support weight: `1.0 * institutions + 0.3 * ln(1 + records)`.
    #[must_use]
    pub fn weight(&self) -> f64 {
        1.0 * (self.institutions as f64) + 0.3 * (1.0 + self.records as f64).ln()
    }

    /// Component-wise sum, used for merge support conservation.
    #[must_use]
    pub fn merge(&self, other: &SupportStats) -> SupportStats {
        SupportStats {
            records: self.records + other.records,
            institutions: self.institutions + other.institutions,
            count: self.count + other.count,
        }
    }
}

/// Intermediate label proposal emitted by S1, consumed by S2.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    /// Hierarchy depth, 0..=3.
    pub level: u8,
    /// Original surface label as extracted.
    pub label: String,
    /// Canonicalized representation.
    pub normalized: String,
    /// Ordered parent anchors/ids; empty iff `level == 0`.
    pub parents: Vec<String>,
    /// Ordered-unique alternative strings.
    pub aliases: Vec<String>,
    /// Aggregated support.
    pub support: SupportStats,
}

impl Candidate {
    /// Construct a `Candidate`, enforcing the level/parents invariant.
    pub fn new(
        level: u8,
        label: impl Into<String>,
        normalized: impl Into<String>,
        parents: Vec<String>,
        aliases: Vec<String>,
        support: SupportStats,
    ) -> Result<Self> {
        if level > 3 {
            return Err(Error::Input(format!("candidate level {level} out of range [0,3]")));
        }
        let label = label.into();
        let normalized = normalized.into();
        if label.trim().is_empty() || normalized.trim().is_empty() {
            return Err(Error::Input("candidate label/normalized must be non-empty".into()));
        }
        if level == 0 && !parents.is_empty() {
            return Err(Error::Input("level 0 candidates must not declare parents".into()));
        }
        if level > 0 && parents.is_empty() {
            return Err(Error::Input("candidates above level 0 require at least one parent anchor".into()));
        }
        Ok(Self { level, label, normalized, parents, aliases, support })
    }
}

/// Structured decision trail attached to a [`Concept`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Rationale {
    /// Which gates passed, by name.
    pub passed_gates: BTreeMap<String, bool>,
    /// Ordered free-text reasons.
    pub reasons: Vec<String>,
    /// Threshold values in effect when the decision was made.
    pub thresholds: BTreeMap<String, ordered_float::OrderedF64>,
}

/// A stable taxonomy node emitted from S2/S3 onward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Concept {
    /// Stable, non-empty identifier.
    pub id: String,
    /// Hierarchy depth, 0..=3.
    pub level: u8,
    /// Canonical label.
    pub canonical_label: String,
    /// Ordered parent ids.
    pub parents: Vec<String>,
    /// Ordered-unique aliases.
    pub aliases: Vec<String>,
    /// Aggregated support.
    pub support: SupportStats,
    /// Decision trail.
    pub rationale: Rationale,
}

impl Concept {
    /// Construct a `Concept`, enforcing id/label non-emptiness and the level/parents invariant.
    pub fn new(
        id: impl Into<String>,
        level: u8,
        canonical_label: impl Into<String>,
        parents: Vec<String>,
        aliases: Vec<String>,
        support: SupportStats,
        rationale: Rationale,
    ) -> Result<Self> {
        let id = id.into();
        let canonical_label = canonical_label.into();
        if id.trim().is_empty() || canonical_label.trim().is_empty() {
            return Err(Error::Input("concept id/canonical_label must be non-empty".into()));
        }
        if level > 3 {
            return Err(Error::Input(format!("concept level {level} out of range [0,3]")));
        }
        if level == 0 && !parents.is_empty() {
            return Err(Error::Input("level 0 concepts must not declare parents".into()));
        }
        if level > 0 && parents.is_empty() {
            return Err(Error::Input("concepts above level 0 require at least one parent".into()));
        }
        Ok(Self { id, level, canonical_label, parents, aliases, support, rationale })
    }

    /// Validate hierarchy invariants against resolved parent concepts: level 0 implies
    /// no parents; level > 0 implies at least one parent, all of strictly smaller level.
    pub fn validate_hierarchy(&self, parent_concepts: Option<&[&Concept]>) -> Result<()> {
        if self.level == 0 && !self.parents.is_empty() {
            return Err(Error::GraphInvariant("level 0 concepts must not declare explicit parents".into()));
        }
        if self.level > 0 && self.parents.is_empty() {
            return Err(Error::GraphInvariant("concepts above level 0 must reference at least one parent".into()));
        }
        if let Some(parents) = parent_concepts {
            for parent in parents {
                if parent.level >= self.level {
                    return Err(Error::GraphInvariant(
                        "parent concepts must be at a shallower hierarchy level than the child".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A mode under which a [`ValidationFinding`] was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FindingMode {
    /// Deterministic rule-based check.
    Rule,
    /// Web-evidence retrieval check.
    Web,
    /// LLM entailment check.
    Llm,
}

/// Outcome of a single validation check for a concept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationFinding {
    /// Concept this finding pertains to.
    pub concept_id: String,
    /// Validator that produced the finding.
    pub mode: FindingMode,
    /// Whether the check passed.
    pub passed: bool,
    /// Non-empty human-readable detail.
    pub detail: String,
    /// Optional supporting evidence snippets.
    pub evidence: Option<BTreeMap<String, String>>,
}

impl ValidationFinding {
    /// Construct a `ValidationFinding`, rejecting an empty detail.
    pub fn new(
        concept_id: impl Into<String>,
        mode: FindingMode,
        passed: bool,
        detail: impl Into<String>,
        evidence: Option<BTreeMap<String, String>>,
    ) -> Result<Self> {
        let detail = detail.into();
        if detail.trim().is_empty() {
            return Err(Error::Input("validation finding detail must not be empty".into()));
        }
        Ok(Self { concept_id: concept_id.into(), mode, passed, detail, evidence })
    }
}

/// Append-only audit record for a deduplication merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeOp {
    /// Unique operation id.
    pub operation_id: String,
    /// Surviving concept id(s); at least one.
    pub winners: Vec<String>,
    /// Absorbed concept id(s); at least one.
    pub losers: Vec<String>,
    /// Name of the merge policy rule applied.
    pub rule: String,
    /// Per-loser edge evidence, serialized as JSON for flexibility.
    pub evidence: Option<BTreeMap<String, serde_json::Value>>,
    /// When the merge was performed.
    pub performed_at: DateTime<Utc>,
}

impl MergeOp {
    /// Construct a `MergeOp`, requiring disjoint non-empty winner/loser sets.
    pub fn new(
        operation_id: impl Into<String>,
        winners: Vec<String>,
        losers: Vec<String>,
        rule: impl Into<String>,
        evidence: Option<BTreeMap<String, serde_json::Value>>,
        performed_at: DateTime<Utc>,
    ) -> Result<Self> {
        if winners.is_empty() || losers.is_empty() {
            return Err(Error::Input("merge operations require at least one winner and one loser".into()));
        }
        let winner_set: std::collections::HashSet<_> = winners.iter().collect();
        if losers.iter().any(|l| winner_set.contains(l)) {
            return Err(Error::Input("concept ids cannot appear in both winners and losers".into()));
        }
        Ok(Self { operation_id: operation_id.into(), winners, losers, rule: rule.into(), evidence, performed_at })
    }
}

/// Append-only audit record for a disambiguation split.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitOp {
    /// Unique operation id.
    pub operation_id: String,
    /// Id of the concept that was split.
    pub source_id: String,
    /// Newly minted concept ids, distinct from the source and each other.
    pub new_ids: Vec<String>,
    /// Name of the split policy rule applied.
    pub rule: String,
    /// Per-sense evidence, serialized as JSON for flexibility.
    pub evidence: Option<BTreeMap<String, serde_json::Value>>,
    /// When the split was performed.
    pub performed_at: DateTime<Utc>,
}

impl SplitOp {
    /// Construct a `SplitOp`, requiring `new_ids` distinct from `source_id` and each other.
    pub fn new(
        operation_id: impl Into<String>,
        source_id: impl Into<String>,
        new_ids: Vec<String>,
        rule: impl Into<String>,
        evidence: Option<BTreeMap<String, serde_json::Value>>,
        performed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let source_id = source_id.into();
        if new_ids.contains(&source_id) {
            return Err(Error::Input("split operations must generate new ids distinct from the source".into()));
        }
        let unique: std::collections::HashSet<_> = new_ids.iter().collect();
        if unique.len() != new_ids.len() {
            return Err(Error::Input("split operations must generate pairwise unique ids".into()));
        }
        Ok(Self { operation_id: operation_id.into(), source_id, new_ids, rule: rule.into(), evidence, performed_at })
    }
}

/// Metadata accompanying a fetched [`PageSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMeta {
    /// Whether the page required JS rendering to produce `text`.
    pub rendered: Option<bool>,
    /// Whether robots.txt blocked the fetch.
    pub robots_blocked: Option<bool>,
    /// Number of HTTP redirects followed.
    pub redirects: u32,
    /// URLs that are known-equivalent to `url` (accumulated on dedup).
    pub alias_urls: Vec<String>,
    /// Free-form source tag (e.g. which crawler produced this).
    pub source: Option<String>,
}

/// A web page as retrieved by the (external) fetcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageSnapshot {
    /// Owning institution.
    pub institution: String,
    /// Normalized URL.
    pub url: String,
    /// Canonical URL, if the page declared one.
    pub canonical_url: Option<String>,
    /// UTC fetch timestamp.
    pub fetched_at: DateTime<Utc>,
    /// HTTP status code.
    pub http_status: u16,
    /// Content-Type header value.
    pub content_type: String,
    /// Raw HTML, if captured.
    pub html: Option<String>,
    /// Extracted text.
    pub text: String,
    /// Detected/declared language.
    pub lang: Option<String>,
    /// sha256 of `text`, hex-encoded. Used as the dedup key.
    pub checksum: String,
    /// Additional metadata.
    pub meta: SnapshotMeta,
}

impl PageSnapshot {
    /// Compute the checksum field from `text` (sha256, hex-encoded).
    #[must_use]
    pub fn checksum_of(text: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Minimal hex encoding helper so the crate doesn't need to pull in the `hex` crate
/// solely for this call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}

/// A total-ordered wrapper over `f64` so it can live in a `BTreeMap` key/value
/// position without pulling in an extra dependency for the rare ordering need.
pub mod ordered_float {
    use serde::{Deserialize, Serialize};

    /// Wraps `f64` with a total order (NaN sorts as greater than everything).
    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct OrderedF64(pub f64);

    impl PartialEq for OrderedF64 {
        fn eq(&self, other: &Self) -> bool {
            self.0.to_bits() == other.0.to_bits() || self.0 == other.0
        }
    }
    impl Eq for OrderedF64 {}
    impl PartialOrd for OrderedF64 {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for OrderedF64 {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Greater)
        }
    }
    impl From<f64> for OrderedF64 {
        fn from(v: f64) -> Self {
            Self(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_weight_formula() {
        let s = SupportStats { records: 3, institutions: 2, count: 10 };
        let expected = 1.0 * 2.0 + 0.3 * (4.0_f64).ln();
        assert!((s.weight() - expected).abs() < 1e-9);
    }

    #[test]
    fn support_merge_is_commutative_and_sums() {
        let a = SupportStats { records: 1, institutions: 1, count: 1 };
        let b = SupportStats { records: 2, institutions: 3, count: 4 };
        assert_eq!(a.merge(&b), b.merge(&a));
        assert_eq!(a.merge(&b).records, 3);
        assert_eq!(a.merge(&b).institutions, 4);
        assert_eq!(a.merge(&b).count, 5);
    }

    #[test]
    fn candidate_level_zero_rejects_parents() {
        let err = Candidate::new(0, "x", "x", vec!["p".into()], vec![], SupportStats::default());
        assert!(err.is_err());
    }

    #[test]
    fn candidate_level_above_zero_requires_parent() {
        let err = Candidate::new(1, "x", "x", vec![], vec![], SupportStats::default());
        assert!(err.is_err());
    }

    #[test]
    fn merge_op_rejects_overlapping_winner_loser() {
        let err = MergeOp::new("op1", vec!["a".into()], vec!["a".into()], "rule", None, Utc::now());
        assert!(err.is_err());
    }

    #[test]
    fn split_op_rejects_source_in_new_ids() {
        let err = SplitOp::new("op1", "src", vec!["src".into()], "rule", None, Utc::now());
        assert!(err.is_err());
    }

    #[test]
    fn concept_validate_hierarchy_rejects_equal_level_parent() {
        let child = Concept::new(
            "c1", 1, "child", vec!["p1".into()], vec![], SupportStats::default(), Rationale::default(),
        )
        .unwrap();
        let parent = Concept::new(
            "p1", 1, "parent", vec![], vec![], SupportStats::default(), Rationale::default(),
        )
        .unwrap();
        let refs = [&parent];
        assert!(child.validate_hierarchy(Some(&refs)).is_err());
    }
}
