//! Serializable wire records for artifacts that wrap non-`Serialize`
//! `taxonomy-core` types (e.g. [`ConceptValidation`]'s `AggregatedDecision`).

use serde::Serialize;
use taxonomy_core::types::ValidationFinding;
use taxonomy_core::validation::ConceptValidation;

/// One concept's validation outcome, flattened for JSON persistence.
#[derive(Debug, Clone, Serialize)]
pub struct ConceptValidationRecord {
    /// Concept id.
    pub concept_id: String,
    /// Final pass/fail decision.
    pub passed: bool,
    /// Aggregated confidence, `vote / total_weight`.
    pub confidence: f64,
    /// Whether a hard rule violation short-circuited the decision.
    pub hard_rule_blocked: bool,
    /// Per-validator findings that fed the decision.
    pub findings: Vec<ValidationFinding>,
}

impl From<&ConceptValidation> for ConceptValidationRecord {
    fn from(v: &ConceptValidation) -> Self {
        Self {
            concept_id: v.concept_id.clone(),
            passed: v.decision.passed,
            confidence: v.decision.confidence,
            hard_rule_blocked: v.decision.hard_rule_blocked,
            findings: v.findings.clone(),
        }
    }
}

/// Per-stage summary counts written alongside each stage's JSONL output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    /// Free-form stage name (matches the observability phase name).
    pub stage: String,
    /// Records/candidates/concepts entering the stage.
    pub input_count: usize,
    /// Records/candidates/concepts kept after the stage ran.
    pub output_count: usize,
    /// Arbitrary extra counts (e.g. `"dropped"`, `"quarantined"`).
    pub extra: std::collections::BTreeMap<String, usize>,
}
