//! Weighted aggregator: combines rule/web/LLM verdicts into one pass/fail
//! decision with a tie-break rule (spec §4.J).

use crate::config::ValidationPolicy;

use super::llm::LlmOutcome;
use super::rule::RuleOutcome;
use super::web::WebOutcome;

/// Final aggregated decision for one concept.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedDecision {
    /// Whether the concept passes validation overall.
    pub passed: bool,
    /// `vote / total_weight`, or 0 when `total_weight == 0`.
    pub confidence: f64,
    /// Whether a hard rule failure short-circuited the decision.
    pub hard_rule_blocked: bool,
}

fn approx_equal(a: f64, b: f64) -> bool {
    let rel_tol = 1e-9;
    let abs_tol = 1e-9;
    (a - b).abs() <= abs_tol.max(rel_tol * a.abs().max(b.abs()))
}

/// Aggregate `rule` (always present), optional `web`, and optional `llm`
/// outcomes per spec's weighted-vote rule with a conservative tie-break.
#[must_use]
pub fn aggregate(rule: &RuleOutcome, web: Option<&WebOutcome>, llm: Option<&LlmOutcome>, policy: &ValidationPolicy) -> AggregatedDecision {
    if policy.hard_rule_failure_blocks && rule.hard_fail {
        return AggregatedDecision { passed: false, confidence: 0.0, hard_rule_blocked: true };
    }

    let web_known = matches!(web, Some(WebOutcome::Resolved { .. }));
    let llm_present = llm.is_some();

    let total_weight = policy.rule_weight + if web_known { policy.web_weight } else { 0.0 } + if llm_present { policy.llm_weight } else { 0.0 };

    let mut vote = if rule.passed { policy.rule_weight } else { 0.0 };
    if let Some(WebOutcome::Resolved { passed, .. }) = web {
        if *passed {
            vote += policy.web_weight;
        }
    }
    if let Some(outcome) = llm {
        if outcome.passed {
            vote += policy.llm_weight;
        }
    }

    if total_weight <= 0.0 {
        return AggregatedDecision { passed: false, confidence: 0.0, hard_rule_blocked: false };
    }

    let threshold = total_weight / 2.0;
    let passed = if approx_equal(vote, threshold) {
        if policy.tie_break_conservative {
            let web_strength = match web {
                Some(WebOutcome::Resolved { evidence, .. }) if !evidence.is_empty() => evidence.iter().map(|s| s.score).sum::<f64>() / evidence.len() as f64,
                _ => 0.0,
            };
            let llm_strength = llm.map(|o| o.confidence).unwrap_or(0.0);
            let evidence_strength = web_strength.max(llm_strength);
            evidence_strength >= policy.tie_break_min_strength
        } else {
            true
        }
    } else {
        vote > threshold
    };

    AggregatedDecision { passed, confidence: vote / total_weight, hard_rule_blocked: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::web::Snippet;

    fn passing_rule() -> RuleOutcome {
        RuleOutcome { violations: vec![], passed: true, hard_fail: false }
    }

    fn failing_rule_hard() -> RuleOutcome {
        RuleOutcome { violations: vec![super::super::rule::Violation { code: "forbidden_pattern", detail: "x".into(), hard: true }], passed: false, hard_fail: true }
    }

    #[test]
    fn hard_rule_failure_blocks_regardless_of_other_votes() {
        let rule = failing_rule_hard();
        let llm = LlmOutcome { passed: true, confidence: 1.0 };
        let decision = aggregate(&rule, None, Some(&llm), &ValidationPolicy::default());
        assert!(!decision.passed);
        assert!(decision.hard_rule_blocked);
    }

    #[test]
    fn majority_pass_when_rule_and_web_agree() {
        let rule = passing_rule();
        let web = WebOutcome::Resolved { passed: true, evidence: vec![Snippet { institution: "MIT".into(), url: "u".into(), text: "t".into(), score: 1.0 }] };
        let decision = aggregate(&rule, Some(&web), None, &ValidationPolicy::default());
        assert!(decision.passed);
    }

    #[test]
    fn tie_break_requires_strength_when_conservative() {
        let policy = ValidationPolicy { rule_weight: 0.5, web_weight: 0.5, llm_weight: 0.0, ..ValidationPolicy::default() };
        let rule = passing_rule();
        let web = WebOutcome::Resolved { passed: false, evidence: vec![] };
        let decision = aggregate(&rule, Some(&web), None, &policy);
        assert!(!decision.passed);
    }

    #[test]
    fn unknown_web_outcome_excluded_from_weight() {
        let rule = passing_rule();
        let decision = aggregate(&rule, Some(&WebOutcome::Unknown), None, &ValidationPolicy::default());
        assert!(decision.passed);
        assert!((decision.confidence - 1.0).abs() < 1e-9);
    }
}
