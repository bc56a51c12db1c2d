//! Error types for the taxonomy pipeline.
//!
//! Every fallible operation in this crate returns [`Result<T, Error>`]. Variants are
//! grouped into the categories from the error taxonomy: configuration, input,
//! LLM, web, content-policy, and graph-invariant errors. Configuration errors are
//! meant to fail fast at startup; the rest are handled per-record by the calling
//! stage (quarantine, drop-with-counter, or propagate) as documented on each stage.

use thiserror::Error;

/// The main error type for `taxonomy-core` operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed (reading/writing JSONL, checkpoints, policy files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON payload failed to parse or did not match the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML policy document failed to parse.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration is invalid: bad weights, unknown phase name, missing env var.
    /// Configuration errors fail fast at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An input record was malformed in a way the stage cannot recover from inline.
    /// S0 quarantines malformed lines and continues; stages downstream of S0 raise
    /// because their inputs are produced by this system and are assumed well-formed.
    #[error("input error: {0}")]
    Input(String),

    /// The LLM gateway could not produce a schema-valid response after retries.
    #[error("LLM validation failed after retries: {0}")]
    LlmValidation(String),

    /// The LLM provider returned an error; `retryable` indicates whether the
    /// caller's backoff loop should retry.
    #[error("LLM provider error (retryable={retryable}): {message}")]
    LlmProvider {
        /// Human-readable provider error message.
        message: String,
        /// Whether a retry is sanctioned for this failure.
        retryable: bool,
    },

    /// The item was quarantined after exhausting retry attempts; callers should
    /// skip the item and record a counter, not propagate this as a hard failure.
    #[error("item quarantined after {attempts} attempts: {reason}")]
    Quarantine {
        /// Number of attempts made before quarantining.
        attempts: u32,
        /// Why the item could not be processed.
        reason: String,
    },

    /// A content-policy gate rejected the item (length bounds, language mismatch,
    /// oversized payload). Callers drop the item and increment a counter.
    #[error("content policy violation: {0}")]
    ContentPolicy(String),

    /// A graph invariant was violated: missing parent, cycle, unique-path
    /// violation, or invalid level.
    #[error("graph invariant violation: {0}")]
    GraphInvariant(String),
}

impl Error {
    /// Coarse error category, used for logging and exit-code selection.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Yaml(_) => "io",
            Error::Configuration(_) => "configuration",
            Error::Input(_) => "input",
            Error::LlmValidation(_) | Error::LlmProvider { .. } | Error::Quarantine { .. } => "llm",
            Error::ContentPolicy(_) => "content_policy",
            Error::GraphInvariant(_) => "graph_invariant",
        }
    }

    /// Whether the failure represents a transient condition worth retrying.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::LlmProvider { retryable: true, .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
