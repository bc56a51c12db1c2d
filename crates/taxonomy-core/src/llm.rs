//! LLM gateway contract (component M).
//!
//! The pipeline never talks to a provider directly; each stage calls through
//! the [`LlmClient`] trait with one of the fixed [`Prompt`]s, and
//! [`call_with_retry`] owns the shared retry/repair policy described in
//! spec §4.E: schema-validation failures retry with `repair:true` up to
//! `max_retries` times, provider errors retry only when flagged retryable.

use serde::Serialize;

use crate::error::{Error, Result};

/// The fixed set of prompts a stage is allowed to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prompt {
    /// S1 candidate extraction.
    Extract,
    /// S3 single-token arbiter.
    VerifySingleToken,
    /// Disambiguation separability check.
    Disambiguate,
    /// Validation entailment check.
    ValidationEntailment,
}

impl Prompt {
    /// The prompt's registry name, as sent to the gateway.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Prompt::Extract => "taxonomy.extract",
            Prompt::VerifySingleToken => "taxonomy.verify_single_token",
            Prompt::Disambiguate => "taxonomy.disambiguate",
            Prompt::ValidationEntailment => "validation.entailment",
        }
    }
}

/// One LLM call: a named prompt, its variables, and whether this is a
/// repair retry.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// Registry name of the prompt being invoked.
    pub prompt: &'static str,
    /// Prompt variables, as a JSON object.
    pub variables: serde_json::Value,
    /// Set on retries after a schema-validation failure.
    pub repair: bool,
}

/// Gateway contract implemented by a concrete provider. `taxonomy-core`
/// depends only on this trait; a real HTTP-backed implementation lives in
/// the CLI crate.
pub trait LlmClient: Send + Sync {
    /// Issue one call and return the parsed JSON payload.
    fn call(&self, request: &LlmRequest) -> Result<serde_json::Value>;
}

/// An `LlmClient` that always fails non-retryably. Used when no LLM is
/// configured and a stage's allowlist/rule path must carry the run alone.
#[derive(Debug, Default)]
pub struct NullLlmClient;

impl LlmClient for NullLlmClient {
    fn call(&self, _request: &LlmRequest) -> Result<serde_json::Value> {
        Err(Error::LlmProvider { message: "no LLM client configured".into(), retryable: false })
    }
}

/// Calls `client` with `prompt`/`variables`, passing each response through
/// `validate`. On a validation failure, retries up to `max_retries` times
/// with `repair:true` set. On a provider error, retries only when the error
/// is flagged retryable. Returns the last error once attempts are exhausted.
pub fn call_with_retry<F>(
    client: &dyn LlmClient,
    prompt: Prompt,
    variables: serde_json::Value,
    max_retries: u32,
    mut validate: F,
) -> Result<serde_json::Value>
where
    F: FnMut(&serde_json::Value) -> Result<()>,
{
    let mut attempt = 0u32;
    let mut repair = false;
    loop {
        let mut vars = variables.clone();
        if repair {
            if let serde_json::Value::Object(ref mut map) = vars {
                map.insert("repair".to_string(), serde_json::Value::Bool(true));
            }
        }
        let request = LlmRequest { prompt: prompt.name(), variables: vars, repair };
        match client.call(&request) {
            Ok(payload) => match validate(&payload) {
                Ok(()) => return Ok(payload),
                Err(e) => {
                    if attempt >= max_retries {
                        return Err(Error::LlmValidation(e.to_string()));
                    }
                    attempt += 1;
                    repair = true;
                }
            },
            Err(Error::LlmProvider { message, retryable }) => {
                if retryable && attempt < max_retries {
                    attempt += 1;
                    repair = true;
                    continue;
                }
                return Err(Error::LlmProvider { message, retryable });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        calls: AtomicU32,
        fail_until: u32,
    }

    impl LlmClient for FlakyClient {
        fn call(&self, _request: &LlmRequest) -> Result<serde_json::Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_until {
                Ok(serde_json::json!({"bad": true}))
            } else {
                Ok(serde_json::json!({"good": true}))
            }
        }
    }

    #[test]
    fn retries_until_validation_passes() {
        let client = FlakyClient { calls: AtomicU32::new(0), fail_until: 2 };
        let result = call_with_retry(&client, Prompt::Extract, serde_json::json!({}), 3, |payload| {
            if payload.get("good").is_some() {
                Ok(())
            } else {
                Err(Error::Input("not good yet".into()))
            }
        });
        assert!(result.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let client = FlakyClient { calls: AtomicU32::new(0), fail_until: 100 };
        let result = call_with_retry(&client, Prompt::Extract, serde_json::json!({}), 1, |payload| {
            if payload.get("good").is_some() {
                Ok(())
            } else {
                Err(Error::Input("never good".into()))
            }
        });
        assert!(result.is_err());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    struct NonRetryableClient;
    impl LlmClient for NonRetryableClient {
        fn call(&self, _request: &LlmRequest) -> Result<serde_json::Value> {
            Err(Error::LlmProvider { message: "quota exceeded".into(), retryable: false })
        }
    }

    #[test]
    fn provider_error_not_retried_unless_flagged() {
        let result = call_with_retry(&NonRetryableClient, Prompt::Extract, serde_json::json!({}), 5, |_| Ok(()));
        assert!(matches!(result, Err(Error::LlmProvider { retryable: false, .. })));
    }
}
