//! # taxonomy-core
//!
//! Core pipeline for turning institutional web text into a validated,
//! hierarchical academic-unit taxonomy.
//!
//! ## Architecture
//!
//! The crate implements a deterministic, checkpointed batch pipeline, each
//! stage reading the previous stage's output and writing its own:
//!
//! - **S0** (`s0`): raw page segmentation, language gating, boilerplate filtering.
//! - **S1** (`s1`): LLM-assisted extraction, normalization, and parent resolution.
//! - **S2** (`s2`): institution resolution, near-duplicate collapse, frequency filtering.
//! - **S3** (`s3`): rule + LLM token verification.
//! - **Dedup** (`dedup`): blocking, pairwise scoring, and union-find merging.
//! - **Disambiguation** (`disambiguation`): ambiguity detection and LLM-arbitrated splitting.
//! - **Validation** (`validation`): weighted rule/web/LLM aggregation.
//! - **Hierarchy** (`hierarchy`): DAG assembly, orphan handling, acyclicity checks.
//! - **Orchestration** (`orchestration`): the five-phase checkpointed driver and run manifest.
//!
//! Supporting these are a normalization & similarity kernel (`normalize`), a
//! thread-safe counters/quarantine/evidence observability fabric
//! (`observability`), a typed YAML configuration layer (`config`), and an
//! LLM gateway contract (`llm`).
//!
//! ## Error handling
//!
//! All operations return [`Result<T, Error>`] with structured categorization:
//!
//! ```rust
//! use taxonomy_core::Error;
//!
//! fn describe(e: &Error) -> &'static str {
//!     if e.is_recoverable() { "retry" } else { e.category() }
//! }
//! ```

/// Typed YAML configuration: per-component policy knobs plus deep-merge/env-override loading.
pub mod config;
/// Deduplication (component H): blocking, pairwise scoring, union-find merge.
pub mod dedup;
/// Disambiguation (component I): ambiguity detection and LLM-arbitrated splitting.
pub mod disambiguation;
/// Error types and the crate-wide `Result` alias.
pub mod error;
/// Hierarchy assembly (component K): DAG construction and structural validation.
pub mod hierarchy;
/// LLM gateway contract (component M): prompts, retry/repair policy, client trait.
pub mod llm;
/// Normalization & similarity kernel (component C).
pub mod normalize;
/// Counters, quarantine store, evidence reservoir, operation log, deterministic PRNG.
pub mod observability;
/// Orchestration (component L): checkpointed five-phase driver and run manifest.
pub mod orchestration;
/// S0 raw extraction: segmentation, language gate, boilerplate filtering.
pub mod s0;
/// S1 LLM-assisted extraction and normalization.
pub mod s1;
/// S2 frequency filtering and institution resolution.
pub mod s2;
/// S3 rule + LLM token verification.
pub mod s3;
/// Core entity model: candidates, concepts, support stats, audit records.
pub mod types;
/// Validation (component J): rule, web-evidence, and LLM-entailment checks.
pub mod validation;

pub use config::{Policy, Settings};
pub use error::{Error, Result};
pub use llm::{LlmClient, LlmRequest, NullLlmClient, Prompt};
pub use observability::{CounterRegistry, EvidenceReservoir, OperationLog, Prng, QuarantineStore};
pub use orchestration::{Orchestrator, RunManifest, RunStatus, PHASES};
pub use types::{Candidate, Concept, MergeOp, SourceRecord, SplitOp, SupportStats, ValidationFinding};
