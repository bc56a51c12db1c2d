//! HTTP-backed [`LlmClient`] implementation.
//!
//! `taxonomy-core` only depends on the [`LlmClient`] trait; this is the one
//! concrete provider the CLI wires in. The gateway is treated as an external
//! collaborator reachable over HTTP: one call per fixed prompt name, with
//! sampling parameters drawn from [`LlmPolicy`] and the request/response
//! shape otherwise opaque JSON, per spec §4.M.

use std::time::Duration;

use serde::Serialize;
use taxonomy_core::config::LlmPolicy;
use taxonomy_core::error::{Error, Result};
use taxonomy_core::{LlmClient, LlmRequest};

/// Sampling parameters threaded alongside the prompt variables on every call.
#[derive(Debug, Clone, Serialize)]
struct SamplingParams {
    temperature: f64,
    seed: u64,
    top_p: f64,
    max_tokens: u32,
}

impl From<&LlmPolicy> for SamplingParams {
    fn from(policy: &LlmPolicy) -> Self {
        Self { temperature: policy.temperature, seed: policy.seed, top_p: policy.top_p, max_tokens: policy.max_tokens }
    }
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    prompt: &'a str,
    variables: &'a serde_json::Value,
    repair: bool,
    #[serde(flatten)]
    sampling: SamplingParams,
}

/// Calls a JSON-over-HTTP LLM gateway: `POST {base_url}/v1/prompts/{name}`
/// with the request body above, expecting the response body to be the raw
/// JSON payload the calling stage will validate.
///
/// Uses `reqwest::blocking` so it can implement the synchronous
/// [`LlmClient`] trait directly; callers running inside the async CLI
/// `main` dispatch through `tokio::task::spawn_blocking` to avoid blocking
/// the executor.
pub struct HttpLlmClient {
    base_url: String,
    api_key: Option<String>,
    sampling: SamplingParams,
    http: reqwest::blocking::Client,
}

impl HttpLlmClient {
    /// Build a client bound to `base_url`, with sampling parameters and the
    /// per-call timeout drawn from `policy`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, policy: &LlmPolicy) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(policy.timeout_ms))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build LLM HTTP client: {e}")))?;
        Ok(Self { base_url: base_url.into(), api_key, sampling: SamplingParams::from(policy), http })
    }
}

impl LlmClient for HttpLlmClient {
    fn call(&self, request: &LlmRequest) -> Result<serde_json::Value> {
        let url = format!("{}/v1/prompts/{}", self.base_url.trim_end_matches('/'), request.prompt);
        let body = GatewayRequest { prompt: request.prompt, variables: &request.variables, repair: request.repair, sampling: self.sampling.clone() };

        let mut req = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().map_err(|e| Error::LlmProvider { message: e.to_string(), retryable: e.is_timeout() || e.is_connect() })?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            let message = response.text().unwrap_or_else(|_| status.to_string());
            return Err(Error::LlmProvider { message: format!("gateway returned {status}: {message}"), retryable });
        }

        response.json::<serde_json::Value>().map_err(|e| Error::LlmProvider { message: format!("malformed gateway response: {e}"), retryable: false })
    }
}
