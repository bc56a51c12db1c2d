//! Rule validator: deterministic structural and pattern checks (spec §4.J).

use regex::Regex;

use crate::config::ValidationPolicy;
use crate::types::Concept;

const VENUE_KEYWORDS: &[&str] = &["conference", "symposium", "workshop", "proceedings", "transactions", "journal"];

/// One rule violation, carrying the machine-readable `code` used to classify
/// it as hard or soft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Violation code, e.g. `"forbidden_pattern"`, `"missing_parents"`.
    pub code: &'static str,
    /// Human-readable detail.
    pub detail: String,
    /// Whether this violation blocks the concept outright.
    pub hard: bool,
}

/// Outcome of running the rule validator over one concept.
#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
    /// All violations found, hard and soft.
    pub violations: Vec<Violation>,
    /// `true` iff no hard violation was found.
    pub passed: bool,
    /// `true` iff any hard violation was found.
    pub hard_fail: bool,
}

fn detect_venue(label: &str) -> bool {
    let lower = label.to_lowercase();
    VENUE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Evaluate the rule validator over `concept`.
#[must_use]
pub fn evaluate(concept: &Concept, policy: &ValidationPolicy) -> RuleOutcome {
    let mut violations = Vec::new();

    for pattern in &policy.forbidden_patterns {
        if let Ok(re) = Regex::new(pattern) {
            if re.is_match(&concept.canonical_label) {
                violations.push(Violation { code: "forbidden_pattern", detail: format!("label matches forbidden pattern '{pattern}'"), hard: true });
            }
        }
    }

    if concept.level == 0 && !concept.parents.is_empty() {
        violations.push(Violation { code: "root_has_parents", detail: "level 0 concept declares parents".to_string(), hard: true });
    }
    if concept.level > 0 && concept.parents.is_empty() {
        violations.push(Violation { code: "missing_parents", detail: "concept above level 0 has no parents".to_string(), hard: true });
    }
    if concept.level > 3 {
        violations.push(Violation { code: "invalid_level", detail: format!("level {} out of range [0,3]", concept.level), hard: true });
    }

    let required = &policy.required_vocab[concept.level.min(3) as usize];
    if !required.is_empty() {
        let lower = concept.canonical_label.to_lowercase();
        let has_required = required.iter().any(|term| lower.contains(&term.to_lowercase()));
        if !has_required {
            violations.push(Violation { code: "missing_required_vocab", detail: format!("label missing required vocabulary for level {}", concept.level), hard: true });
        }
    }

    if concept.level == 3 && detect_venue(&concept.canonical_label) {
        let hard_pattern_hit = policy.forbidden_patterns.iter().any(|p| Regex::new(p).map(|re| re.is_match(&concept.canonical_label)).unwrap_or(false));
        violations.push(Violation {
            code: "venue_name_detected",
            detail: "label resembles a venue/publication name, not a topic".to_string(),
            hard: policy.venue_detection_hard || hard_pattern_hit,
        });
    }

    let hard_fail = violations.iter().any(|v| v.hard);
    RuleOutcome { violations, passed: !hard_fail, hard_fail }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rationale, SupportStats};

    fn concept(label: &str, level: u8, parents: Vec<&str>) -> Concept {
        Concept::new("c1", level, label, parents.into_iter().map(String::from).collect(), vec![], SupportStats::default(), Rationale::default()).unwrap()
    }

    #[test]
    fn flags_missing_parents_above_level_zero() {
        let c = concept("Biology", 1, vec![]);
        let outcome = evaluate(&c, &ValidationPolicy::default());
        assert!(outcome.hard_fail);
        assert!(outcome.violations.iter().any(|v| v.code == "missing_parents"));
    }

    #[test]
    fn flags_venue_keyword_at_l3() {
        let c = concept("International Conference on AI", 3, vec!["p1"]);
        let outcome = evaluate(&c, &ValidationPolicy::default());
        assert!(outcome.violations.iter().any(|v| v.code == "venue_name_detected" && v.hard));
    }

    #[test]
    fn passes_a_well_formed_concept() {
        let c = concept("Machine Learning", 1, vec!["p1"]);
        let outcome = evaluate(&c, &ValidationPolicy::default());
        assert!(outcome.passed);
        assert!(outcome.violations.is_empty());
    }
}
