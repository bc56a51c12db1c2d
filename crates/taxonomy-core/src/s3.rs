//! S3: token verification (component G).
//!
//! A deterministic rule engine gates every candidate's canonical label;
//! only rule failures (and labels off the allowlist) escalate to the LLM
//! arbiter. The final decision combines both per `prefer_rule_over_llm`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::TokenVerificationPolicy;
use crate::error::{Error, Result};
use crate::llm::{call_with_retry, LlmClient, Prompt};
use crate::observability::CounterRegistry;
use crate::types::Candidate;

static FORBIDDEN_PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[!?;"'`~^*_+={}\[\]<>\\|]"#).unwrap());
static VENUE_KEYWORDS: &[&str] = &["conference", "symposium", "workshop", "proceedings", "transactions", "journal"];

/// Outcome of the rule engine for one candidate.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    /// Whether every rule passed.
    pub passed: bool,
    /// Human-readable failure reasons, empty when `passed`.
    pub reasons: Vec<String>,
    /// Up to 3 suggested rewrites, offered when `!passed`.
    pub suggestions: Vec<String>,
}

fn tokenize(canonical: &str, hyphenated_compounds_allowed: bool) -> Vec<String> {
    let text = if hyphenated_compounds_allowed { canonical.to_string() } else { canonical.replace('-', " ") };
    text.split_whitespace().map(str::to_string).collect()
}

fn alnum_ratio(s: &str) -> f64 {
    let non_space: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    if non_space.is_empty() {
        return 0.0;
    }
    let alnum = non_space.iter().filter(|c| c.is_alphanumeric()).count();
    alnum as f64 / non_space.len() as f64
}

fn suggestion_variants(canonical: &str) -> Vec<String> {
    let mut variants = Vec::new();

    let stripped_punct: String = canonical.chars().filter(|c| !FORBIDDEN_PUNCTUATION.is_match(&c.to_string())).collect();
    let stripped_punct = stripped_punct.split_whitespace().collect::<Vec<_>>().join(" ");
    if stripped_punct != canonical && !stripped_punct.is_empty() {
        variants.push(stripped_punct);
    }

    let dehyphenated = canonical.replace('-', " ").split_whitespace().collect::<Vec<_>>().join(" ");
    if dehyphenated != canonical && !dehyphenated.is_empty() {
        variants.push(dehyphenated);
    }

    let alnum_only: String = canonical.chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect();
    let alnum_only = alnum_only.split_whitespace().collect::<Vec<_>>().join(" ");
    if alnum_only != canonical && !alnum_only.is_empty() {
        variants.push(alnum_only);
    }

    variants.sort();
    variants.dedup();
    variants.truncate(3);
    variants
}

/// Evaluate the deterministic rule engine against `candidate`'s canonical
/// label, per spec §4.G. Allowlist membership is checked by the caller
/// before invoking this.
#[must_use]
pub fn evaluate_rules(candidate: &Candidate, policy: &TokenVerificationPolicy) -> RuleOutcome {
    let canonical = &candidate.normalized;
    let mut reasons = Vec::new();

    let tokens = tokenize(canonical, policy.hyphenated_compounds_allowed);
    let max_tokens = policy.max_tokens_per_level[candidate.level as usize];
    if tokens.len() > max_tokens {
        reasons.push(format!("token count {} exceeds max {max_tokens} for level {}", tokens.len(), candidate.level));
    }

    if FORBIDDEN_PUNCTUATION.is_match(canonical) {
        reasons.push("canonical label contains forbidden punctuation".to_string());
    }

    let len = canonical.chars().count();
    if len < policy.min_length || len > policy.max_length {
        reasons.push(format!("canonical label length {len} outside bounds [{}, {}]", policy.min_length, policy.max_length));
    }

    if alnum_ratio(canonical) < policy.min_alnum_ratio {
        reasons.push(format!("alphanumeric ratio below {}", policy.min_alnum_ratio));
    }

    if candidate.level == 3 && policy.venue_keywords_forbidden_at_l3 {
        let lower = canonical.to_lowercase();
        if VENUE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            reasons.push("venue keyword forbidden at level 3".to_string());
        }
    }

    let passed = reasons.is_empty();
    let suggestions = if passed { Vec::new() } else { suggestion_variants(canonical) };
    RuleOutcome { passed, reasons, suggestions }
}

/// Parsed, tolerant `taxonomy.verify_single_token` response.
#[derive(Debug, Clone)]
pub struct LlmVerdict {
    /// Whether the LLM judged the label acceptable.
    pub pass: bool,
    /// Reason string, when supplied.
    pub reason: Option<String>,
}

fn parse_bool_field(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_f64().map(|f| f.is_finite() && f != 0.0),
        serde_json::Value::String(s) => {
            let lower = s.to_lowercase();
            if ["true", "yes", "y", "1", "pass", "ok", "success"].contains(&lower.as_str()) {
                Some(true)
            } else if ["false", "no", "n", "0", "fail", "failure"].contains(&lower.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_verify_response(payload: &serde_json::Value) -> Result<LlmVerdict> {
    let obj = payload.as_object().ok_or_else(|| Error::Input("unexpected-payload".into()))?;
    let field = ["pass", "passed", "ok", "success"].iter().find_map(|k| obj.get(*k));
    let Some(field) = field else {
        return Err(Error::Input("unexpected-payload".into()));
    };
    let Some(pass) = parse_bool_field(field) else {
        return Err(Error::Input("unexpected-payload".into()));
    };
    let reason = obj.get("reason").and_then(|v| v.as_str()).map(str::to_string);
    Ok(LlmVerdict { pass, reason })
}

/// Calls the `taxonomy.verify_single_token` prompt; on a malformed payload
/// returns a failing verdict with reason `"unexpected-payload"` rather than
/// propagating an error, per spec §4.G.
pub fn arbitrate(client: &dyn LlmClient, candidate: &Candidate, max_retries: u32) -> LlmVerdict {
    let variables = serde_json::json!({
        "level": candidate.level,
        "label": candidate.normalized,
    });
    let mut parsed: Option<LlmVerdict> = None;
    let result = call_with_retry(client, Prompt::VerifySingleToken, variables, max_retries, |payload| {
        let verdict = parse_verify_response(payload)?;
        parsed = Some(verdict);
        Ok(())
    });
    match result {
        Ok(_) => parsed.unwrap_or(LlmVerdict { pass: false, reason: Some("unexpected-payload".into()) }),
        Err(_) => LlmVerdict { pass: false, reason: Some("unexpected-payload".into()) },
    }
}

/// Final S3 decision for one candidate, after rule evaluation and (if
/// invoked) LLM arbitration.
#[derive(Debug, Clone)]
pub struct TokenDecision {
    /// Whether the candidate passed S3.
    pub passed: bool,
    /// Accepted rewrite suggestions, appended as aliases when `passed`.
    pub accepted_suggestions: Vec<String>,
    /// Why the candidate was rejected, when `!passed`.
    pub reasons: Vec<String>,
}

/// Runs the full S3 pipeline for `candidate`: allowlist short-circuit, rule
/// engine, and (if rules failed and the label isn't allowlisted) the LLM
/// arbiter, per `policy.prefer_rule_over_llm`.
pub fn verify(client: &dyn LlmClient, candidate: &Candidate, policy: &TokenVerificationPolicy, counters: &CounterRegistry) -> TokenDecision {
    let _ = counters.increment("S3", "checked", 1);

    if policy.allowlist.iter().any(|a| a.eq_ignore_ascii_case(&candidate.normalized)) {
        let _ = counters.increment("S3", "passed_rule", 1);
        return TokenDecision { passed: true, accepted_suggestions: Vec::new(), reasons: Vec::new() };
    }

    let rule_outcome = evaluate_rules(candidate, policy);
    if rule_outcome.passed {
        let _ = counters.increment("S3", "passed_rule", 1);
    } else {
        let _ = counters.increment("S3", "failed_rule", 1);
    }

    let llm_verdict = if !rule_outcome.passed {
        Some(arbitrate(client, candidate, 0))
    } else {
        None
    };
    if let Some(v) = &llm_verdict {
        if v.pass {
            let _ = counters.increment("S3", "passed_llm", 1);
        } else {
            let _ = counters.increment("S3", "failed_llm", 1);
        }
    }

    let passed = if policy.prefer_rule_over_llm {
        rule_outcome.passed && llm_verdict.as_ref().map_or(true, |v| v.pass)
    } else if let Some(v) = &llm_verdict {
        v.pass
    } else {
        rule_outcome.passed
    };

    let accepted_suggestions = if passed { rule_outcome.suggestions.clone() } else { Vec::new() };
    let mut reasons = rule_outcome.reasons;
    if let Some(v) = &llm_verdict {
        if let Some(reason) = &v.reason {
            reasons.push(format!("llm: {reason}"));
        }
    }

    TokenDecision { passed, accepted_suggestions, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SupportStats;

    fn candidate(level: u8, normalized: &str) -> Candidate {
        Candidate::new(level, normalized, normalized, if level == 0 { vec![] } else { vec!["p".into()] }, vec![], SupportStats::default()).unwrap()
    }

    struct AlwaysPassClient;
    impl LlmClient for AlwaysPassClient {
        fn call(&self, _request: &crate::llm::LlmRequest) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"pass": true, "reason": "looks fine"}))
        }
    }

    struct MalformedClient;
    impl LlmClient for MalformedClient {
        fn call(&self, _request: &crate::llm::LlmRequest) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"unexpected": "shape"}))
        }
    }

    #[test]
    fn rule_engine_rejects_forbidden_punctuation() {
        let c = candidate(1, "computer! science");
        let policy = TokenVerificationPolicy::default();
        let outcome = evaluate_rules(&c, &policy);
        assert!(!outcome.passed);
    }

    #[test]
    fn rule_engine_rejects_venue_keyword_at_l3() {
        let c = candidate(3, "international conference on robotics");
        let policy = TokenVerificationPolicy::default();
        let outcome = evaluate_rules(&c, &policy);
        assert!(!outcome.passed);
    }

    #[test]
    fn rule_engine_passes_simple_label() {
        let c = candidate(1, "computer science");
        let policy = TokenVerificationPolicy::default();
        let outcome = evaluate_rules(&c, &policy);
        assert!(outcome.passed);
    }

    #[test]
    fn parse_verify_response_accepts_multiple_shapes() {
        assert!(parse_verify_response(&serde_json::json!({"passed": "yes"})).unwrap().pass);
        assert!(!parse_verify_response(&serde_json::json!({"ok": 0})).unwrap().pass);
        assert!(parse_verify_response(&serde_json::json!({"nonsense": 1})).is_err());
    }

    #[test]
    fn malformed_llm_payload_fails_with_unexpected_payload_reason() {
        let c = candidate(1, "computer! science");
        let verdict = arbitrate(&MalformedClient, &c, 0);
        assert!(!verdict.pass);
        assert_eq!(verdict.reason.as_deref(), Some("unexpected-payload"));
    }

    #[test]
    fn verify_allowlist_short_circuits() {
        let policy = TokenVerificationPolicy { allowlist: vec!["ai".into()], ..TokenVerificationPolicy::default() };
        let counters = CounterRegistry::new(None);
        let c = candidate(1, "ai");
        let decision = verify(&AlwaysPassClient, &c, &policy, &counters);
        assert!(decision.passed);
    }

    #[test]
    fn verify_appends_suggestions_when_llm_overturns_rule_failure() {
        let policy = TokenVerificationPolicy { prefer_rule_over_llm: false, ..TokenVerificationPolicy::default() };
        let counters = CounterRegistry::new(None);
        let c = candidate(1, "computer! science");
        let decision = verify(&AlwaysPassClient, &c, &policy, &counters);
        assert!(decision.passed);
    }
}
