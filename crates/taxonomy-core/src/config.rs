//! Configuration management for the taxonomy pipeline.
//!
//! A single immutable [`Settings`] value is built once at startup via
//! [`Settings::load`] and threaded through every stage; nothing mutates it
//! afterward (spec design note: "global configuration is passed as an
//! immutable `Settings` value built once at startup").
//!
//! ## Precedence (highest first)
//!
//! 1. `TAXONOMY_POLICY__<dotted.path>` / `TAXONOMY_SETTINGS__<dotted.path>`
//!    environment variables (JSON-decoded when the value parses as JSON,
//!    otherwise kept as a string).
//! 2. `<config_dir>/<environment>.yaml`
//! 3. `<config_dir>/default.yaml`
//! 4. Struct defaults.
//!
//! Files and overrides are merged as untyped [`serde_yaml::Value`] trees
//! (deep merge, override wins on scalar conflicts) before a single typed
//! deserialize into [`Settings`], so a partial override file only needs to
//! specify the paths it changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{Error, Result};

/// Per-level thresholds used by S2 frequency filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelThreshold {
    /// Minimum distinct supporting institutions required to keep a candidate.
    pub min_institutions: u64,
    /// Minimum summed source count required to keep a candidate.
    pub min_src_count: u64,
}

/// Label length bounds and token limits, per level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelLabelPolicy {
    /// Minimum canonical label length, in characters.
    pub min_length: usize,
    /// Maximum canonical label length, in characters.
    pub max_length: usize,
    /// Maximum token count allowed at this level.
    pub max_tokens: usize,
}

/// Policy knobs for the normalization & similarity kernel (component A).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizationPolicy {
    /// Minimum Jaro-Winkler/Jaccard score to treat two canonical strings as similar.
    pub min_similarity_threshold: f64,
    /// Shingle size (word n-grams) for intra-page dedup.
    pub shingle_size: usize,
    /// Shingle-Jaccard threshold above which a block is considered a duplicate.
    pub shingle_dedup_threshold: f64,
    /// Whether ambiguous acronym expansion (e.g. "AI") is enabled by policy opt-in.
    pub expand_ambiguous_acronyms: bool,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self {
            min_similarity_threshold: 0.85,
            shingle_size: 3,
            shingle_dedup_threshold: 0.8,
            expand_ambiguous_acronyms: false,
        }
    }
}

/// Policy for S0 raw extraction (component D).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionPolicy {
    /// Target language base code; `None` disables the language gate.
    pub target_language: Option<String>,
    /// Minimum language-confidence required when a confidence is supplied.
    pub min_language_confidence: f64,
    /// Minimum block length, in characters, to keep.
    pub min_chars: usize,
    /// Maximum block length, in characters, to keep.
    pub max_chars: usize,
    /// Boilerplate regex patterns; matching blocks are dropped.
    pub boilerplate_patterns: Vec<String>,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            target_language: Some("en".into()),
            min_language_confidence: 0.5,
            min_chars: 8,
            max_chars: 4000,
            boilerplate_patterns: vec![
                r"(?i)^all rights reserved".into(),
                r"(?i)^skip to (main )?content".into(),
                r"(?i)^cookie (policy|notice)".into(),
            ],
        }
    }
}

/// Policy for S1 extraction & normalization (component E).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionNormalizationPolicy {
    /// Maximum retries on LLM schema-validation failure.
    pub max_retries: u32,
    /// Ratcliff-Obershelp-style similarity cutoff for fuzzy parent resolution.
    pub parent_similarity_cutoff: f64,
    /// Label length bounds / token limits, by level (index = level).
    pub label_policy: [LevelLabelPolicy; 4],
}

impl Default for ExtractionNormalizationPolicy {
    fn default() -> Self {
        let default_label = LevelLabelPolicy { min_length: 2, max_length: 80, max_tokens: 8 };
        Self {
            max_retries: 2,
            parent_similarity_cutoff: 0.6,
            label_policy: [default_label.clone(), default_label.clone(), default_label.clone(), default_label],
        }
    }
}

/// Policy for S2 frequency filtering (component F).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrequencyPolicy {
    /// Per-level kept thresholds, index = level.
    pub thresholds: [LevelThreshold; 4],
    /// Minimum shared fingerprint prefix length to collapse near-duplicate records.
    pub min_prefix_length: usize,
    /// Whether to additionally strip numeric/hash version suffixes before collapsing.
    pub strip_numeric_suffix: bool,
    /// Institution-name resolution rule: `prefer-campus`, `prefer-system`, or `merge`.
    pub institution_rule: String,
}

impl Default for FrequencyPolicy {
    fn default() -> Self {
        Self {
            thresholds: [
                LevelThreshold { min_institutions: 2, min_src_count: 2 },
                LevelThreshold { min_institutions: 2, min_src_count: 2 },
                LevelThreshold { min_institutions: 1, min_src_count: 1 },
                LevelThreshold { min_institutions: 1, min_src_count: 1 },
            ],
            min_prefix_length: 6,
            strip_numeric_suffix: true,
            institution_rule: "prefer-campus".into(),
        }
    }
}

/// Policy for S3 token verification (component G).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenVerificationPolicy {
    /// Maximum tokens allowed per level, index = level.
    pub max_tokens_per_level: [usize; 4],
    /// Whether hyphenated compounds count as one token.
    pub hyphenated_compounds_allowed: bool,
    /// Minimum canonical label length.
    pub min_length: usize,
    /// Maximum canonical label length.
    pub max_length: usize,
    /// Minimum alphanumeric-character ratio over non-space characters.
    pub min_alnum_ratio: f64,
    /// Whether venue keywords (conference, journal, ...) are forbidden at L3.
    pub venue_keywords_forbidden_at_l3: bool,
    /// Labels exempt from rule checking entirely.
    pub allowlist: Vec<String>,
    /// Prefer the rule engine's verdict over the LLM arbiter's when both ran.
    pub prefer_rule_over_llm: bool,
}

impl Default for TokenVerificationPolicy {
    fn default() -> Self {
        Self {
            max_tokens_per_level: [3, 4, 5, 6],
            hyphenated_compounds_allowed: true,
            min_length: 2,
            max_length: 80,
            min_alnum_ratio: 0.7,
            venue_keywords_forbidden_at_l3: true,
            allowlist: Vec::new(),
            prefer_rule_over_llm: true,
        }
    }
}

/// Policy for deduplication (component H).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeduplicationPolicy {
    /// Prefix-blocking key length.
    pub prefix_length: usize,
    /// Maximum block size before deterministic splitting.
    pub max_block_size: usize,
    /// Maximum pairs compared per block.
    pub max_comparisons_per_block: usize,
    /// Cheap Jaro-Winkler probe threshold before full phonetic-block scoring.
    pub phonetic_probe_threshold: f64,
    /// Acceptance threshold for L0/L1 blocks.
    pub l0_l1_threshold: f64,
    /// Acceptance threshold for L2/L3 blocks.
    pub l2_l3_threshold: f64,
    /// Global floor combined with the level threshold (`max` of the two).
    pub min_similarity_threshold: f64,
    /// Whether concepts with disjoint/empty parent sets may still merge.
    pub cross_parent_merge_allowed: bool,
    /// Merge-policy rule name recorded on emitted `MergeOp`s.
    pub merge_policy: String,
    /// Stop evaluating weaker features once a stronger one crosses its threshold.
    pub early_stopping: bool,
}

impl Default for DeduplicationPolicy {
    fn default() -> Self {
        Self {
            prefix_length: 4,
            max_block_size: 200,
            max_comparisons_per_block: 20_000,
            phonetic_probe_threshold: 0.75,
            l0_l1_threshold: 0.92,
            l2_l3_threshold: 0.88,
            min_similarity_threshold: 0.8,
            cross_parent_merge_allowed: false,
            merge_policy: "winner-take-all".into(),
            early_stopping: true,
        }
    }
}

/// Policy for disambiguation (component I).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisambiguationPolicy {
    /// Require distinct parent lineages before treating a label group as ambiguous.
    pub require_distinct_parents: bool,
    /// Tokens of context to pull around each match, split evenly before/after.
    pub context_window_size: usize,
    /// Maximum summarized contexts included in the LLM prompt.
    pub max_contexts_for_prompt: usize,
    /// Minimum LLM confidence required to accept a split.
    pub min_evidence_strength: f64,
    /// Minimum ambiguity score required to consider a group for disambiguation.
    pub min_ambiguity_score: f64,
    /// Caps how many SplitOps are retained in the evidence sample (logging only).
    pub sample_splits_count: usize,
}

impl Default for DisambiguationPolicy {
    fn default() -> Self {
        Self {
            require_distinct_parents: true,
            context_window_size: 12,
            max_contexts_for_prompt: 5,
            min_evidence_strength: 0.6,
            min_ambiguity_score: 0.0,
            sample_splits_count: 50,
        }
    }
}

/// Policy for the validation aggregator (component J).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationPolicy {
    /// Weight for the rule validator's vote.
    pub rule_weight: f64,
    /// Weight for the web validator's vote.
    pub web_weight: f64,
    /// Weight for the LLM validator's vote.
    pub llm_weight: f64,
    /// A hard rule failure blocks the concept regardless of other votes.
    pub hard_rule_failure_blocks: bool,
    /// Require `evidence_strength` to clear a floor to resolve ties in favor of pass.
    pub tie_break_conservative: bool,
    /// Minimum evidence strength required to pass a tie under `tie_break_conservative`.
    pub tie_break_min_strength: f64,
    /// Minimum web snippets required for the web validator to report `passed`.
    pub min_snippet_matches: usize,
    /// Maximum snippets retained per concept.
    pub max_snippets_per_concept: usize,
    /// Maximum non-overlapping snippets extracted from a single snapshot.
    pub max_snippets_per_snapshot: usize,
    /// Maximum snippet length, in characters.
    pub snippet_max_length: usize,
    /// Maximum evidence tokens (approx 4 chars/token) sent to the LLM validator.
    pub max_evidence_tokens: usize,
    /// Domains treated as authoritative beyond the `.edu`/`.gov` fallback.
    pub authoritative_domains: Vec<String>,
    /// Forbidden-pattern regexes checked against the canonical label.
    pub forbidden_patterns: Vec<String>,
    /// Required vocabulary terms per level (at least one must appear, case-insensitive); empty = no requirement.
    pub required_vocab: [Vec<String>; 4],
    /// Treat a detected venue-name match as a hard violation.
    pub venue_detection_hard: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            rule_weight: 0.4,
            web_weight: 0.3,
            llm_weight: 0.3,
            hard_rule_failure_blocks: true,
            tie_break_conservative: true,
            tie_break_min_strength: 0.6,
            min_snippet_matches: 1,
            max_snippets_per_concept: 5,
            max_snippets_per_snapshot: 3,
            snippet_max_length: 240,
            max_evidence_tokens: 2000,
            authoritative_domains: Vec::new(),
            forbidden_patterns: vec![r"(?i)^(untitled|n/?a|unknown)$".into(), r"https?://".into()],
            required_vocab: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
            venue_detection_hard: true,
        }
    }
}

/// Policy for hierarchy assembly (component K).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyPolicy {
    /// Maximum total nodes in the assembled graph.
    pub max_graph_size: usize,
    /// Require exact level(parent)+1 == level(child), rejecting shortcuts.
    pub strict_level_enforcement: bool,
    /// Allow level shortcuts (child.level - parent.level > 1) even under strict enforcement.
    pub allow_level_shortcuts: bool,
    /// Enforce that a concept has a single parent unless explicitly exempted.
    pub enforce_unique_paths: bool,
    /// Concept ids exempted from the unique-parent rule.
    pub allow_multi_parent_exceptions: Vec<String>,
    /// Orphan handling strategy: `drop`, `quarantine`, or `attach_placeholder`.
    pub orphan_strategy: String,
}

impl Default for HierarchyPolicy {
    fn default() -> Self {
        Self {
            max_graph_size: 200_000,
            strict_level_enforcement: true,
            allow_level_shortcuts: false,
            enforce_unique_paths: true,
            allow_multi_parent_exceptions: Vec::new(),
            orphan_strategy: "attach_placeholder".into(),
        }
    }
}

/// Policy for the orchestrator (component L).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationPolicy {
    /// Cap on post-processing iterations (validator/dedup/disambig loop).
    pub max_post_processing_iterations: usize,
    /// Directory checkpoints are written to, relative to `paths.output_dir`.
    pub checkpoint_dir: String,
}

impl Default for OrchestrationPolicy {
    fn default() -> Self {
        Self { max_post_processing_iterations: 5, checkpoint_dir: "checkpoints".into() }
    }
}

/// Policy for the LLM gateway (component M).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmPolicy {
    /// Sampling temperature.
    pub temperature: f64,
    /// Deterministic seed passed to the provider, when supported.
    pub seed: u64,
    /// Nucleus sampling top-p.
    pub top_p: f64,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Per-call timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Retry attempts for retryable provider errors.
    pub retry_attempts: u32,
    /// Quarantine the item after this many total failures.
    pub quarantine_after_attempts: u32,
}

impl Default for LlmPolicy {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            seed: 20230927,
            top_p: 1.0,
            max_tokens: 1024,
            timeout_ms: 30_000,
            retry_attempts: 3,
            quarantine_after_attempts: 4,
        }
    }
}

/// Policy root, grouping every component's policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Policy {
    /// Policy document version, recorded in the run manifest.
    #[serde(default = "default_policy_version")]
    pub policy_version: String,
    /// Normalization & similarity kernel policy.
    #[serde(default)]
    pub normalization: NormalizationPolicy,
    /// S0 raw extraction policy.
    #[serde(default)]
    pub extraction: ExtractionPolicy,
    /// S1 extraction & normalization policy.
    #[serde(default)]
    pub extraction_normalization: ExtractionNormalizationPolicy,
    /// S2 frequency filtering policy.
    #[serde(default)]
    pub frequency: FrequencyPolicy,
    /// S3 token verification policy.
    #[serde(default)]
    pub token_verification: TokenVerificationPolicy,
    /// Deduplication policy.
    #[serde(default)]
    pub deduplication: DeduplicationPolicy,
    /// Disambiguation policy.
    #[serde(default)]
    pub disambiguation: DisambiguationPolicy,
    /// Validation policy.
    #[serde(default)]
    pub validation: ValidationPolicy,
    /// Hierarchy assembly policy.
    #[serde(default)]
    pub hierarchy: HierarchyPolicy,
    /// Orchestration policy.
    #[serde(default)]
    pub orchestration: OrchestrationPolicy,
    /// LLM gateway policy.
    #[serde(default)]
    pub llm: LlmPolicy,
}

fn default_policy_version() -> String {
    "v1".into()
}

/// Filesystem layout for persisted pipeline artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root directory for input data.
    pub data_dir: PathBuf,
    /// Root directory for stage outputs.
    pub output_dir: PathBuf,
    /// Cache directory for intermediate artifacts.
    pub cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("data"), output_dir: PathBuf::from("output"), cache_dir: PathBuf::from(".cache") }
    }
}

/// Top-level, immutable pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Active runtime environment (`development`, `testing`, `production`).
    pub environment: String,
    /// Deterministic seed namespace for the PRNG helper (component C).
    pub random_seed: u64,
    /// Filesystem layout.
    pub paths: PathsConfig,
    /// All per-component policy knobs.
    pub policies: Policy,
}

impl Default for Settings {
    fn default() -> Self {
        Self { environment: "development".into(), random_seed: 20230927, paths: PathsConfig::default(), policies: Policy::default() }
    }
}

impl Settings {
    /// Load settings from `<config_dir>/default.yaml` + `<config_dir>/<environment>.yaml`,
    /// then apply `TAXONOMY_POLICY__*` / `TAXONOMY_SETTINGS__*` environment overrides.
    ///
    /// Missing files are treated as empty documents, not errors; a completely
    /// absent `config_dir` yields the struct defaults plus whatever env
    /// overrides are present.
    pub fn load(config_dir: &Path, environment: &str) -> Result<Self> {
        let base = load_yaml_file(&config_dir.join("default.yaml"))?;
        let env_specific = load_yaml_file(&config_dir.join(format!("{environment}.yaml")))?;
        let merged = deep_merge(base, env_specific);
        let with_overrides = apply_env_overrides(merged, std::env::vars())?;
        let mut settings: Settings = serde_yaml::from_value(with_overrides)
            .map_err(|e| Error::Configuration(format!("failed to parse merged settings: {e}")))?;
        settings.environment = environment.to_string();
        settings.validate()?;
        Ok(settings)
    }

    /// Validate invariants that must hold before the pipeline runs; fails fast.
    pub fn validate(&self) -> Result<()> {
        let v = &self.policies.validation;
        for (name, w) in [("rule_weight", v.rule_weight), ("web_weight", v.web_weight), ("llm_weight", v.llm_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Configuration(format!("validation.{name} must be finite and non-negative, got {w}")));
            }
        }
        if !["prefer-campus", "prefer-system", "merge"].contains(&self.policies.frequency.institution_rule.as_str()) {
            return Err(Error::Configuration(format!(
                "frequency.institution_rule must be one of prefer-campus|prefer-system|merge, got {:?}",
                self.policies.frequency.institution_rule
            )));
        }
        if !["drop", "quarantine", "attach_placeholder"].contains(&self.policies.hierarchy.orphan_strategy.as_str()) {
            return Err(Error::Configuration(format!(
                "hierarchy.orphan_strategy must be one of drop|quarantine|attach_placeholder, got {:?}",
                self.policies.hierarchy.orphan_strategy
            )));
        }
        Ok(())
    }
}

fn load_yaml_file(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Mapping(Default::default()));
    }
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&text)?;
    Ok(value)
}

/// Recursively merge two YAML mappings; scalar/sequence conflicts take `override_`.
fn deep_merge(base: Value, override_: Value) -> Value {
    match (base, override_) {
        (Value::Mapping(mut base_map), Value::Mapping(override_map)) => {
            for (k, v) in override_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        (_, override_) => override_,
    }
}

/// Apply `TAXONOMY_POLICY__<dotted.path>` and `TAXONOMY_SETTINGS__<dotted.path>`
/// environment overrides onto `base`. `TAXONOMY_SETTINGS__` paths are resolved
/// from the settings root; `TAXONOMY_POLICY__` paths are resolved relative to
/// `policies.`. Values are JSON-decoded when they parse as JSON, else kept as
/// a YAML string scalar.
fn apply_env_overrides(base: Value, vars: impl Iterator<Item = (String, String)>) -> Result<Value> {
    let mut result = base;
    let mut entries: Vec<(Vec<String>, String)> = Vec::new();
    for (key, value) in vars {
        if let Some(rest) = key.strip_prefix("TAXONOMY_SETTINGS__") {
            let path: Vec<String> = rest.to_lowercase().split("__").map(str::to_string).collect();
            entries.push((path, value));
        } else if let Some(rest) = key.strip_prefix("TAXONOMY_POLICY__") {
            let mut path: Vec<String> = vec!["policies".to_string()];
            path.extend(rest.to_lowercase().split("__").map(str::to_string));
            entries.push((path, value));
        }
    }
    // Sort for determinism across process env iteration order.
    entries.sort();
    for (path, raw) in entries {
        let value = decode_env_value(&raw);
        result = set_path(result, &path, value);
    }
    Ok(result)
}

fn decode_env_value(raw: &str) -> Value {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(raw) {
        return json_to_yaml(json);
    }
    Value::String(raw.to_string())
}

fn json_to_yaml(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => serde_yaml::from_str(&n.to_string()).unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(arr) => Value::Sequence(arr.into_iter().map(json_to_yaml).collect()),
        serde_json::Value::Object(obj) => {
            let mut map = serde_yaml::Mapping::new();
            for (k, v) in obj {
                map.insert(Value::String(k), json_to_yaml(v));
            }
            Value::Mapping(map)
        }
    }
}

fn set_path(root: Value, path: &[String], value: Value) -> Value {
    if path.is_empty() {
        return value;
    }
    let mut map = match root {
        Value::Mapping(m) => m,
        _ => serde_yaml::Mapping::new(),
    };
    let key = Value::String(path[0].clone());
    if path.len() == 1 {
        map.insert(key, value);
    } else {
        let existing = map.remove(&key).unwrap_or(Value::Mapping(Default::default()));
        map.insert(key, set_path(existing, &path[1..], value));
    }
    Value::Mapping(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn env_override_nested_path_sets_value() {
        let base = serde_yaml::to_value(Settings::default()).unwrap();
        let vars = vec![("TAXONOMY_POLICY__deduplication__max_block_size".to_string(), "500".to_string())].into_iter();
        let merged = apply_env_overrides(base, vars).unwrap();
        let settings: Settings = serde_yaml::from_value(merged).unwrap();
        assert_eq!(settings.policies.deduplication.max_block_size, 500);
    }

    #[test]
    fn invalid_negative_weight_fails_validation() {
        let mut s = Settings::default();
        s.policies.validation.rule_weight = -1.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn invalid_orphan_strategy_fails_validation() {
        let mut s = Settings::default();
        s.policies.hierarchy.orphan_strategy = "explode".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn deep_merge_overrides_only_named_keys() {
        let base: Value = serde_yaml::from_str("a:\n  x: 1\n  y: 2\n").unwrap();
        let over: Value = serde_yaml::from_str("a:\n  y: 9\n").unwrap();
        let merged = deep_merge(base, over);
        let map = merged.as_mapping().unwrap().get(Value::String("a".into())).unwrap().as_mapping().unwrap();
        assert_eq!(map.get(Value::String("x".into())).unwrap().as_i64(), Some(1));
        assert_eq!(map.get(Value::String("y".into())).unwrap().as_i64(), Some(9));
    }
}
