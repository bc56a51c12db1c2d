//! LLM validator: calls `validation.entailment` over web evidence (spec §4.J).

use serde::Deserialize;

use crate::config::ValidationPolicy;
use crate::error::{Error, Result};
use crate::llm::{call_with_retry, LlmClient, Prompt};

use super::web::Snippet;

/// Parsed `validation.entailment` response.
#[derive(Debug, Clone, Deserialize)]
struct EntailmentResponse {
    passed: bool,
    #[serde(default)]
    confidence: f64,
}

/// Outcome of the LLM validator for one concept.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmOutcome {
    /// Whether the LLM judged the label entailed by the evidence.
    pub passed: bool,
    /// Combined confidence: `0.5*llm_confidence + 0.5*mean(evidence.score)`.
    pub confidence: f64,
}

fn truncate_to_budget(evidence: &[Snippet], max_evidence_tokens: usize) -> String {
    let budget_chars = max_evidence_tokens.saturating_mul(4);
    let mut joined = String::new();
    for snippet in evidence {
        let candidate = format!("[{}] {}\n", snippet.institution, snippet.text);
        if joined.len() + candidate.len() > budget_chars {
            break;
        }
        joined.push_str(&candidate);
    }
    joined
}

/// Call `validation.entailment` with `canonical_label` and serialized
/// `evidence` (truncated to `policy.max_evidence_tokens`). A failed call
/// (after the gateway's retry policy) yields `passed=false, confidence=0`
/// rather than propagating, matching spec's "failing LLM call" rule.
#[must_use]
pub fn evaluate(client: &dyn LlmClient, canonical_label: &str, evidence: &[Snippet], policy: &ValidationPolicy) -> LlmOutcome {
    let context = truncate_to_budget(evidence, policy.max_evidence_tokens);
    let variables = serde_json::json!({
        "label": canonical_label,
        "evidence": context,
    });

    let mut parsed: Option<EntailmentResponse> = None;
    let result = call_with_retry(client, Prompt::ValidationEntailment, variables, 1, |payload| {
        let response: EntailmentResponse =
            serde_json::from_value(payload.clone()).map_err(|e| Error::Input(format!("validation.entailment response malformed: {e}")))?;
        parsed = Some(response);
        Ok(())
    });

    match result {
        Ok(_) => {
            let response = parsed.expect("call_with_retry succeeded without a parsed payload");
            let evidence_mean = if evidence.is_empty() { 0.0 } else { evidence.iter().map(|s| s.score).sum::<f64>() / evidence.len() as f64 };
            LlmOutcome { passed: response.passed, confidence: 0.5 * response.confidence + 0.5 * evidence_mean }
        }
        Err(_) => LlmOutcome { passed: false, confidence: 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubClient {
        payload: serde_json::Value,
    }

    impl LlmClient for StubClient {
        fn call(&self, _request: &crate::llm::LlmRequest) -> Result<serde_json::Value> {
            Ok(self.payload.clone())
        }
    }

    struct FailingClient;
    impl LlmClient for FailingClient {
        fn call(&self, _request: &crate::llm::LlmRequest) -> Result<serde_json::Value> {
            Err(Error::LlmProvider { message: "down".into(), retryable: false })
        }
    }

    #[test]
    fn combines_llm_and_evidence_confidence() {
        let client = StubClient { payload: serde_json::json!({"passed": true, "confidence": 0.8}) };
        let evidence = vec![Snippet { institution: "MIT".into(), url: "https://mit.edu".into(), text: "x".into(), score: 1.0 }];
        let outcome = evaluate(&client, "Biology", &evidence, &ValidationPolicy::default());
        assert!(outcome.passed);
        assert!((outcome.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn failing_call_yields_zero_confidence() {
        let outcome = evaluate(&FailingClient, "Biology", &[], &ValidationPolicy::default());
        assert!(!outcome.passed);
        assert_eq!(outcome.confidence, 0.0);
    }
}
