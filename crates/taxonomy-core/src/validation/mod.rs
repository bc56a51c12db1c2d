//! Validation (component J): rule, web-evidence, and LLM-entailment checks
//! combined by a weighted aggregator.

pub mod aggregator;
pub mod llm;
pub mod rule;
pub mod web;

pub use aggregator::{aggregate, AggregatedDecision};
pub use llm::LlmOutcome;
pub use rule::{RuleOutcome, Violation};
pub use web::{EvidenceIndex, Snippet, WebOutcome};

use crate::config::ValidationPolicy;
use crate::llm::LlmClient;
use crate::observability::CounterRegistry;
use crate::types::{Concept, FindingMode, ValidationFinding};

/// One concept's full validation result: the aggregated decision plus the
/// per-validator findings that fed it.
#[derive(Debug, Clone)]
pub struct ConceptValidation {
    /// Concept id.
    pub concept_id: String,
    /// Final pass/fail decision.
    pub decision: AggregatedDecision,
    /// One finding per validator that ran.
    pub findings: Vec<ValidationFinding>,
}

/// Runs the rule/web/LLM validators and the aggregator over a batch of
/// concepts, incrementing `Validation` phase counters.
pub struct ValidationProcessor<'a> {
    policy: &'a ValidationPolicy,
    counters: &'a CounterRegistry,
}

impl<'a> ValidationProcessor<'a> {
    /// Construct a processor bound to `policy`.
    #[must_use]
    pub fn new(policy: &'a ValidationPolicy, counters: &'a CounterRegistry) -> Self {
        Self { policy, counters }
    }

    /// Validate one concept. `index` is searched for web evidence (skipped
    /// entirely when `None`); `client` runs the LLM entailment check when
    /// `Some` and web evidence was found.
    pub fn validate_one(
        &self,
        concept: &Concept,
        index: Option<(&EvidenceIndex, bool)>,
        client: Option<&dyn LlmClient>,
    ) -> ConceptValidation {
        let _ = self.counters.increment("Validation", "checked", 1);
        let mut findings = Vec::new();

        let rule_outcome = rule::evaluate(concept, self.policy);
        if !rule_outcome.passed {
            let _ = self.counters.increment("Validation", "rule_failed", 1);
        }
        let rule_detail = if rule_outcome.violations.is_empty() {
            "no rule violations".to_string()
        } else {
            rule_outcome.violations.iter().map(|v| v.code).collect::<Vec<_>>().join(",")
        };
        if let Ok(f) = ValidationFinding::new(concept.id.clone(), FindingMode::Rule, rule_outcome.passed, rule_detail, None) {
            findings.push(f);
        }

        let web_outcome = index.map(|(idx, timed_out)| web::search(idx, &concept.canonical_label, None, timed_out, self.policy));
        if let Some(outcome) = &web_outcome {
            let (passed, detail) = match outcome {
                WebOutcome::Resolved { passed, evidence } => (*passed, format!("{} matching snippet(s)", evidence.len())),
                WebOutcome::Unknown => (true, "web evidence unavailable (unknown)".to_string()),
            };
            if matches!(outcome, WebOutcome::Resolved { passed: false, .. }) {
                let _ = self.counters.increment("Validation", "web_failed", 1);
            }
            if let Ok(f) = ValidationFinding::new(concept.id.clone(), FindingMode::Web, passed, detail, None) {
                findings.push(f);
            }
        }

        let llm_outcome = match (client, &web_outcome) {
            (Some(c), Some(WebOutcome::Resolved { evidence, .. })) if !evidence.is_empty() => Some(llm::evaluate(c, &concept.canonical_label, evidence, self.policy)),
            _ => None,
        };
        if let Some(outcome) = &llm_outcome {
            if !outcome.passed {
                let _ = self.counters.increment("Validation", "llm_failed", 1);
            }
            if let Ok(f) = ValidationFinding::new(concept.id.clone(), FindingMode::Llm, outcome.passed, format!("confidence={:.3}", outcome.confidence), None) {
                findings.push(f);
            }
        }

        let decision = aggregator::aggregate(&rule_outcome, web_outcome.as_ref(), llm_outcome.as_ref(), self.policy);
        if decision.passed {
            let _ = self.counters.increment("Validation", "passed_all", 1);
        }

        ConceptValidation { concept_id: concept.id.clone(), decision, findings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rationale, SupportStats};

    #[test]
    fn validate_one_passes_without_web_or_llm() {
        let policy = ValidationPolicy::default();
        let counters = CounterRegistry::new(None);
        let processor = ValidationProcessor::new(&policy, &counters);
        let concept = Concept::new("c1", 0, "Biology", vec![], vec![], SupportStats::default(), Rationale::default()).unwrap();
        let result = processor.validate_one(&concept, None, None);
        assert!(result.decision.passed);
        assert_eq!(result.findings.len(), 1);
    }

    #[test]
    fn validate_one_fails_hard_rule_violation() {
        let policy = ValidationPolicy::default();
        let counters = CounterRegistry::new(None);
        let processor = ValidationProcessor::new(&policy, &counters);
        let concept = Concept::new("c1", 1, "Unknown", vec![], vec![], SupportStats::default(), Rationale::default()).unwrap();
        let result = processor.validate_one(&concept, None, None);
        assert!(!result.decision.passed);
        assert!(result.decision.hard_rule_blocked);
    }
}
