//! Wires `taxonomy-core`'s stage processors into the eight-phase
//! checkpointed orchestration driver.
//!
//! Each phase runner closure captures the run's shared [`PipelineState`]
//! through an `Rc<RefCell<_>>`: [`Orchestrator::run`] drives every phase
//! synchronously on one thread (see `commands::run`, which hops onto
//! `tokio::task::spawn_blocking` for the whole run), so there's no need for
//! `Arc`/`Mutex` here. A phase that finds its inputs already populated in
//! memory uses them directly; one invoked after a fresh-process resume
//! re-hydrates from the previous phase's JSONL artifacts first.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use taxonomy_core::config::Settings;
use taxonomy_core::dedup::DedupProcessor;
use taxonomy_core::disambiguation::{extract_context_window, ConceptEvidence, ContextWindow, DisambiguationProcessor};
use taxonomy_core::hierarchy::HierarchyAssembler;
use taxonomy_core::normalize::AcronymTable;
use taxonomy_core::observability::QuarantineStore;
use taxonomy_core::orchestration::{run_post_processing, PhaseRunner, PostProcessor};
use taxonomy_core::s0::S0Processor;
use taxonomy_core::s1::{self, ParentEntry, ParentIndex, S1Processor};
use taxonomy_core::s2::{self, S2Processor};
use taxonomy_core::s3;
use taxonomy_core::types::{Candidate, Concept, MergeOp, Rationale, SourceRecord};
use taxonomy_core::validation::{EvidenceIndex, ValidationProcessor};
use taxonomy_core::{CounterRegistry, Error as CoreError, LlmClient, NullLlmClient, OperationLog, Orchestrator, PHASES, RunManifest};

use crate::artifacts::ConceptValidationRecord;
use crate::cli::RunArgs;
use crate::input::InputBlock;
use crate::io_jsonl::{read_json, read_jsonl, write_json, write_jsonl};
use crate::llm_client::HttpLlmClient;
use crate::state::PipelineState;

/// Bridges an I/O failure (as `anyhow::Error`) into the `taxonomy_core`
/// error type phase runners must return.
fn io_err(e: anyhow::Error) -> CoreError {
    CoreError::Configuration(e.to_string())
}

fn read_jsonl_or_empty<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_jsonl(path)
}

/// A concept id deterministic in `(level, normalized, parents)`, so the same
/// candidate always resolves to the same id across runs and resumes.
fn concept_id(level: u8, normalized: &str, parents: &[String]) -> String {
    let mut payload = format!("{level}|{normalized}");
    for parent in parents {
        payload.push('|');
        payload.push_str(parent);
    }
    format!("c{level}-{}", &blake3::hash(payload.as_bytes()).to_hex().to_string()[..24])
}

/// Serializable mirror of [`s2::ScoredCandidate`], which doesn't itself derive
/// `Serialize` (its fields do).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScoredCandidateRecord {
    candidate: Candidate,
    rationale: Rationale,
}

impl From<&s2::ScoredCandidate> for ScoredCandidateRecord {
    fn from(s: &s2::ScoredCandidate) -> Self {
        Self { candidate: s.candidate.clone(), rationale: s.rationale.clone() }
    }
}

/// Serializable mirror of one [`ContextWindow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextWindowRecord {
    source_id: String,
    tokens: Vec<String>,
}

/// Serializable mirror of one concept's [`ConceptEvidence`] entry, for the
/// side-channel evidence artifact that lets a fresh process resume
/// disambiguation/validation without re-deriving evidence from S0 text.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvidenceRecord {
    concept_id: String,
    institutions: Vec<String>,
    contexts: Vec<ContextWindowRecord>,
}

fn evidence_to_records(evidence: &BTreeMap<String, ConceptEvidence>) -> Vec<EvidenceRecord> {
    evidence
        .iter()
        .map(|(id, ev)| EvidenceRecord {
            concept_id: id.clone(),
            institutions: ev.institutions.iter().cloned().collect(),
            contexts: ev.contexts.iter().map(|w| ContextWindowRecord { source_id: w.source_id.clone(), tokens: w.tokens.clone() }).collect(),
        })
        .collect()
}

fn records_to_evidence(records: Vec<EvidenceRecord>) -> BTreeMap<String, ConceptEvidence> {
    records
        .into_iter()
        .map(|r| {
            let ev = ConceptEvidence {
                institutions: r.institutions.into_iter().collect(),
                contexts: r.contexts.into_iter().map(|c| ContextWindow { source_id: c.source_id, tokens: c.tokens }).collect(),
            };
            (r.concept_id, ev)
        })
        .collect()
}

fn evidence_path(run_dir: &Path) -> PathBuf {
    run_dir.join("S1").join("evidence.jsonl")
}

fn write_evidence_snapshot(state: &Rc<RefCell<PipelineState>>, run_dir: &Path) -> Result<()> {
    let records = evidence_to_records(&state.borrow().evidence);
    write_jsonl(&evidence_path(run_dir), &records)
}

fn ensure_evidence_loaded(state: &Rc<RefCell<PipelineState>>, run_dir: &Path) -> Result<()> {
    if !state.borrow().evidence.is_empty() {
        return Ok(());
    }
    let records: Vec<EvidenceRecord> = read_jsonl_or_empty(&evidence_path(run_dir))?;
    if records.is_empty() {
        return Ok(());
    }
    state.borrow_mut().evidence = records_to_evidence(records);
    Ok(())
}

/// Loads every level's pre-dedup S3 concept output, for levels not already
/// populated in memory.
fn rehydrate_concepts_below(state: &Rc<RefCell<PipelineState>>, run_dir: &Path, level: u8) -> Result<()> {
    for lvl in 0..level {
        let needs = state.borrow().concepts.by_level[lvl as usize].is_empty();
        if !needs {
            continue;
        }
        let path = run_dir.join("S3").join(format!("level{lvl}_concepts.jsonl"));
        let concepts: Vec<Concept> = read_jsonl_or_empty(&path)?;
        state.borrow_mut().concepts.by_level[lvl as usize] = concepts;
    }
    Ok(())
}

/// Ensures the full (all-levels) concept set is populated in memory,
/// preferring the most-advanced on-disk snapshot so a fresh-process resume
/// picks up after whichever post-processing stage last ran.
fn ensure_concepts_loaded(state: &Rc<RefCell<PipelineState>>, run_dir: &Path) -> Result<()> {
    if !state.borrow().concepts.flatten().is_empty() {
        return Ok(());
    }
    for candidate_path in [
        run_dir.join("validation").join("concepts.jsonl"),
        run_dir.join("disambig").join("concepts.jsonl"),
        run_dir.join("dedup").join("concepts.jsonl"),
    ] {
        let concepts: Vec<Concept> = read_jsonl_or_empty(&candidate_path)?;
        if !concepts.is_empty() {
            state.borrow_mut().concepts.reassign(concepts);
            return Ok(());
        }
    }
    rehydrate_concepts_below(state, run_dir, 4)
}

fn rehydrate_source_records(state: &Rc<RefCell<PipelineState>>, run_dir: &Path) -> Result<()> {
    if !state.borrow().source_records.is_empty() {
        return Ok(());
    }
    let records: Vec<SourceRecord> = read_jsonl_or_empty(&run_dir.join("S0").join("source_records.jsonl"))?;
    if records.is_empty() {
        return Ok(());
    }
    let mut st = state.borrow_mut();
    for record in records {
        let fp = s1::record_fingerprint(&record);
        st.fingerprint_index.insert(fp, record.clone());
        st.source_records.push(record);
    }
    Ok(())
}

fn build_parent_index(state: &Rc<RefCell<PipelineState>>, level: u8) -> ParentIndex {
    let st = state.borrow();
    let mut entries = Vec::new();
    for lvl in 0..level {
        for concept in &st.concepts.by_level[lvl as usize] {
            entries.push(ParentEntry { identifier: concept.id.clone(), level: concept.level, canonical: concept.canonical_label.clone(), aliases: concept.aliases.clone() });
        }
    }
    ParentIndex::build(entries)
}

/// Builds a loser -> winner map from a batch of merge operations. Every
/// [`MergeOp`] produced by [`DedupProcessor`] carries exactly one winner.
fn build_remap(merge_ops: &[MergeOp]) -> BTreeMap<String, String> {
    let mut remap = BTreeMap::new();
    for op in merge_ops {
        if let Some(winner) = op.winners.first() {
            for loser in &op.losers {
                remap.insert(loser.clone(), winner.clone());
            }
        }
    }
    remap
}

/// Merges loser evidence entries into their winner's, per a dedup remap.
fn apply_evidence_remap(evidence: &mut BTreeMap<String, ConceptEvidence>, remap: &BTreeMap<String, String>) {
    for (loser, winner) in remap {
        if let Some(lost) = evidence.remove(loser) {
            let entry = evidence.entry(winner.clone()).or_default();
            entry.institutions.extend(lost.institutions);
            entry.contexts.extend(lost.contexts);
        }
    }
}

/// Runs [`DedupProcessor`] over every level independently, rewriting parent
/// references at higher levels and evidence keys as each level's losers are
/// folded into their winners.
fn run_dedup_all_levels(state: &Rc<RefCell<PipelineState>>, settings: &Settings, counters: &CounterRegistry) -> Vec<MergeOp> {
    let mut all_merge_ops = Vec::new();
    for level in 0u8..4 {
        let concepts = state.borrow().concepts.by_level[level as usize].clone();
        if concepts.is_empty() {
            continue;
        }
        let processor = DedupProcessor::new(&settings.policies.deduplication, counters, true);
        let outcome = processor.process(concepts);
        let remap = build_remap(&outcome.merge_ops);

        let mut st = state.borrow_mut();
        st.concepts.by_level[level as usize] = outcome.concepts;
        if !remap.is_empty() {
            st.concepts.apply_remap(&remap);
            apply_evidence_remap(&mut st.evidence, &remap);
        }
        drop(st);

        all_merge_ops.extend(outcome.merge_ops);
    }
    state.borrow_mut().merge_ops.extend(all_merge_ops.clone());
    all_merge_ops
}

fn concept_evidence_from_bucket(state: &Rc<RefCell<PipelineState>>, level: u8, concept: &Concept, window_size: usize) -> ConceptEvidence {
    let st = state.borrow();
    let key = (concept.canonical_label.clone(), concept.parents.clone());
    let Some(bucket) = st.buckets_by_level[level as usize].get(&key) else {
        return ConceptEvidence::default();
    };
    let mut ev = ConceptEvidence { institutions: bucket.institutions.keys().cloned().collect(), contexts: Vec::new() };
    for fingerprints in bucket.institutions.values() {
        for fp in fingerprints {
            if let Some(record) = st.fingerprint_index.get(fp) {
                ev.contexts.extend(extract_context_window(fp, &record.text, &concept.canonical_label, window_size));
            }
        }
    }
    ev
}

/// Extracts, normalizes, aggregates, filters, and verifies one level's
/// candidates, emitting the level's concepts and side-channel evidence.
#[allow(clippy::too_many_arguments)]
fn run_level(
    level: u8,
    state: &Rc<RefCell<PipelineState>>,
    settings: &Settings,
    llm: &dyn LlmClient,
    input_blocks: &[InputBlock],
    run_dir: &Path,
    counters: &CounterRegistry,
) -> taxonomy_core::Result<serde_json::Value> {
    rehydrate_source_records(state, run_dir).map_err(io_err)?;
    rehydrate_concepts_below(state, run_dir, level).map_err(io_err)?;
    ensure_evidence_loaded(state, run_dir).map_err(io_err)?;

    let quarantine = QuarantineStore::new();

    if level == 0 && state.borrow().source_records.is_empty() {
        let processor = S0Processor::new(&settings.policies.extraction, counters, &quarantine);
        let mut produced = Vec::new();
        for block in input_blocks.iter().cloned() {
            if let Ok(records) = processor.process(block.into()) {
                produced.extend(records);
            }
        }
        let mut st = state.borrow_mut();
        for record in produced {
            let fp = s1::record_fingerprint(&record);
            st.fingerprint_index.insert(fp, record.clone());
            st.source_records.push(record);
        }
        drop(st);
        write_jsonl(&run_dir.join("S0").join("source_records.jsonl"), &state.borrow().source_records).map_err(io_err)?;
    }

    let acronyms = AcronymTable::default();
    let parent_index = build_parent_index(state, level);
    let cutoff = settings.policies.extraction_normalization.parent_similarity_cutoff;

    let records_snapshot: Vec<SourceRecord> = state.borrow().source_records.clone();
    let mut normalized_candidates = Vec::new();
    for record in &records_snapshot {
        let items = match s1::extract(llm, record, level, &settings.policies.extraction_normalization) {
            Ok(items) => items,
            Err(e) => {
                quarantine.record("S1", Some(record.provenance.institution.clone()), record.provenance.url.clone(), e.to_string(), record.text.clone());
                continue;
            }
        };
        for item in &items {
            if let Some(mut candidate) = s1::normalize_item(item, record, level, &settings.policies.extraction_normalization, &acronyms) {
                if level > 0 {
                    candidate.parents = candidate.parents.iter().map(|anchor| parent_index.resolve(anchor, level, &acronyms, cutoff)).collect();
                }
                normalized_candidates.push(candidate);
            }
        }
    }

    let s1_processor = S1Processor::new(counters);
    let buckets = s1_processor.aggregate(level, normalized_candidates);

    {
        let mut st = state.borrow_mut();
        st.buckets_by_level[level as usize].clear();
        for bucket in &buckets {
            st.buckets_by_level[level as usize].insert((bucket.normalized.clone(), bucket.parents.clone()), bucket.clone());
        }
    }

    let s2_processor = S2Processor::new(&settings.policies.frequency, counters, BTreeMap::new());
    let (kept, dropped) = s2_processor.process(buckets);

    let window_size = settings.policies.disambiguation.context_window_size;
    let mut level_concepts = Vec::new();
    for scored in &kept {
        let decision = s3::verify(llm, &scored.candidate, &settings.policies.token_verification, counters);
        if !decision.passed {
            quarantine.record("S3", None, None, decision.reasons.join("; "), scored.candidate.normalized.clone());
            continue;
        }

        let mut aliases = scored.candidate.aliases.clone();
        aliases.extend(decision.accepted_suggestions.iter().cloned());
        aliases.sort();
        aliases.dedup();

        let mut rationale = scored.rationale.clone();
        rationale.reasons.extend(decision.reasons.clone());

        let id = concept_id(level, &scored.candidate.normalized, &scored.candidate.parents);
        let concept = Concept::new(id, level, scored.candidate.normalized.clone(), scored.candidate.parents.clone(), aliases, scored.candidate.support, rationale)?;
        level_concepts.push(concept);
    }

    {
        let evidences: Vec<(String, ConceptEvidence)> = level_concepts.iter().map(|c| (c.id.clone(), concept_evidence_from_bucket(state, level, c, window_size))).collect();
        let mut st = state.borrow_mut();
        for (id, ev) in evidences {
            st.evidence.insert(id, ev);
        }
        st.concepts.by_level[level as usize] = level_concepts.clone();
    }

    write_jsonl(&run_dir.join("S2").join(format!("level{level}_kept.jsonl")), &kept.iter().map(ScoredCandidateRecord::from).collect::<Vec<_>>()).map_err(io_err)?;
    write_jsonl(&run_dir.join("S2").join(format!("level{level}_dropped.jsonl")), &dropped.iter().map(ScoredCandidateRecord::from).collect::<Vec<_>>()).map_err(io_err)?;
    write_jsonl(&run_dir.join("S3").join(format!("level{level}_concepts.jsonl")), &level_concepts).map_err(io_err)?;
    write_json(&run_dir.join("quarantine").join(format!("level{level}.json")), &quarantine.export(10_000)).map_err(io_err)?;
    write_evidence_snapshot(state, run_dir).map_err(io_err)?;

    Ok(serde_json::json!({
        "level": level,
        "records_seen": records_snapshot.len(),
        "candidates_kept": kept.len(),
        "candidates_dropped": dropped.len(),
        "concepts_emitted": level_concepts.len(),
        "quarantined": quarantine.len(),
    }))
}

fn run_consolidation(state: &Rc<RefCell<PipelineState>>, settings: &Settings, run_dir: &Path, counters: &CounterRegistry) -> taxonomy_core::Result<serde_json::Value> {
    rehydrate_concepts_below(state, run_dir, 4).map_err(io_err)?;
    ensure_evidence_loaded(state, run_dir).map_err(io_err)?;

    let merge_ops = run_dedup_all_levels(state, settings, counters);

    let all_concepts = state.borrow().concepts.flatten();
    write_jsonl(&run_dir.join("dedup").join("concepts.jsonl"), &all_concepts).map_err(io_err)?;
    write_jsonl(&run_dir.join("dedup").join("merge_ops.jsonl"), &merge_ops).map_err(io_err)?;
    write_evidence_snapshot(state, run_dir).map_err(io_err)?;

    Ok(serde_json::json!({ "concepts_remaining": all_concepts.len(), "merges_applied": merge_ops.len() }))
}

/// Re-validates every concept, failing hard-rule violations back out.
struct ValidationStage {
    evidence_index: Option<EvidenceIndex>,
    state: Rc<RefCell<PipelineState>>,
    settings: Rc<Settings>,
    run_dir: PathBuf,
    llm: Arc<dyn LlmClient>,
}

impl PostProcessor for ValidationStage {
    fn name(&self) -> &str {
        "validation"
    }

    fn apply(&mut self, counters: &CounterRegistry, _operations: &OperationLog) -> taxonomy_core::Result<bool> {
        ensure_concepts_loaded(&self.state, &self.run_dir).map_err(io_err)?;
        let processor = ValidationProcessor::new(&self.settings.policies.validation, counters);
        let concepts = self.state.borrow().concepts.flatten();

        let index_ref = self.evidence_index.as_ref().map(|idx| (idx, false));
        let llm_ref: Option<&dyn LlmClient> = if index_ref.is_some() { Some(self.llm.as_ref()) } else { None };

        let mut results = Vec::with_capacity(concepts.len());
        let mut survivors = Vec::with_capacity(concepts.len());
        let mut changed = false;
        for concept in &concepts {
            let validation = processor.validate_one(concept, index_ref, llm_ref);
            if validation.decision.passed {
                survivors.push(concept.clone());
            } else {
                changed = true;
            }
            results.push(ConceptValidationRecord::from(&validation));
        }

        self.state.borrow_mut().concepts.reassign(survivors.clone());
        write_jsonl(&self.run_dir.join("validation").join("findings.jsonl"), &results).map_err(io_err)?;
        write_jsonl(&self.run_dir.join("validation").join("concepts.jsonl"), &survivors).map_err(io_err)?;
        Ok(changed)
    }
}

/// Re-runs deduplication to absorb near-duplicates the earlier passes missed
/// or that validation's removals exposed.
struct DedupStage {
    state: Rc<RefCell<PipelineState>>,
    settings: Rc<Settings>,
    run_dir: PathBuf,
}

impl PostProcessor for DedupStage {
    fn name(&self) -> &str {
        "dedup"
    }

    fn apply(&mut self, counters: &CounterRegistry, _operations: &OperationLog) -> taxonomy_core::Result<bool> {
        ensure_concepts_loaded(&self.state, &self.run_dir).map_err(io_err)?;
        let merge_ops = run_dedup_all_levels(&self.state, &self.settings, counters);
        if !merge_ops.is_empty() {
            let all_concepts = self.state.borrow().concepts.flatten();
            write_jsonl(&self.run_dir.join("dedup").join("concepts.jsonl"), &all_concepts).map_err(io_err)?;
            write_evidence_snapshot(&self.state, &self.run_dir).map_err(io_err)?;
        }
        Ok(!merge_ops.is_empty())
    }
}

/// Detects and resolves ambiguous (same-label, distinct-sense) concepts.
struct DisambiguationStage {
    state: Rc<RefCell<PipelineState>>,
    settings: Rc<Settings>,
    run_dir: PathBuf,
    llm: Arc<dyn LlmClient>,
}

impl PostProcessor for DisambiguationStage {
    fn name(&self) -> &str {
        "disambiguation"
    }

    fn apply(&mut self, counters: &CounterRegistry, _operations: &OperationLog) -> taxonomy_core::Result<bool> {
        ensure_concepts_loaded(&self.state, &self.run_dir).map_err(io_err)?;
        ensure_evidence_loaded(&self.state, &self.run_dir).map_err(io_err)?;

        let processor = DisambiguationProcessor::new(&self.settings.policies.disambiguation, counters);
        let concepts = self.state.borrow().concepts.flatten();
        let evidence = self.state.borrow().evidence.clone();
        let (survivors, split_ops) = processor.process(self.llm.as_ref(), concepts, &evidence, Utc::now());

        if split_ops.is_empty() {
            return Ok(false);
        }

        let mut next_evidence = evidence.clone();
        for op in &split_ops {
            let mut combined = ConceptEvidence::default();
            for member_id in op.source_id.split('+') {
                if let Some(ev) = evidence.get(member_id) {
                    combined.institutions.extend(ev.institutions.iter().cloned());
                    combined.contexts.extend(ev.contexts.iter().cloned());
                }
                next_evidence.remove(member_id);
            }
            for new_id in &op.new_ids {
                next_evidence.insert(new_id.clone(), combined.clone());
            }
        }

        let mut st = self.state.borrow_mut();
        st.concepts.reassign(survivors.clone());
        st.evidence = next_evidence;
        st.split_ops.extend(split_ops.clone());
        drop(st);

        write_jsonl(&self.run_dir.join("disambig").join("concepts.jsonl"), &survivors).map_err(io_err)?;
        write_jsonl(&self.run_dir.join("disambig").join("split_ops.jsonl"), &split_ops).map_err(io_err)?;
        write_evidence_snapshot(&self.state, &self.run_dir).map_err(io_err)?;
        Ok(true)
    }
}

fn run_post_processing_phase(
    state: &Rc<RefCell<PipelineState>>,
    settings: &Rc<Settings>,
    run_dir: &Path,
    evidence_snapshots: &[taxonomy_core::types::PageSnapshot],
    llm: &Arc<dyn LlmClient>,
    counters: &CounterRegistry,
    operations: &OperationLog,
) -> taxonomy_core::Result<serde_json::Value> {
    ensure_concepts_loaded(state, run_dir).map_err(io_err)?;

    let evidence_index = if evidence_snapshots.is_empty() { None } else { Some(EvidenceIndex::build(evidence_snapshots.to_vec())) };

    let mut processors: Vec<Box<dyn PostProcessor>> = vec![
        Box::new(ValidationStage { evidence_index, state: Rc::clone(state), settings: Rc::clone(settings), run_dir: run_dir.to_path_buf(), llm: Arc::clone(llm) }),
        Box::new(DedupStage { state: Rc::clone(state), settings: Rc::clone(settings), run_dir: run_dir.to_path_buf() }),
        Box::new(DisambiguationStage { state: Rc::clone(state), settings: Rc::clone(settings), run_dir: run_dir.to_path_buf(), llm: Arc::clone(llm) }),
    ];

    let iterations = run_post_processing(&mut processors, counters, operations, settings.policies.orchestration.max_post_processing_iterations)?;

    Ok(serde_json::json!({
        "iterations": iterations,
        "concepts_remaining": state.borrow().concepts.flatten().len(),
    }))
}

fn run_resume_summary(state: &Rc<RefCell<PipelineState>>, run_dir: &Path) -> taxonomy_core::Result<serde_json::Value> {
    ensure_concepts_loaded(state, run_dir).map_err(io_err)?;
    let st = state.borrow();
    Ok(serde_json::json!({
        "source_records": st.source_records.len(),
        "concepts": st.concepts.flatten().len(),
        "merge_ops_so_far": st.merge_ops.len(),
        "split_ops_so_far": st.split_ops.len(),
    }))
}

fn run_finalization(state: &Rc<RefCell<PipelineState>>, settings: &Settings, run_dir: &Path, counters: &CounterRegistry) -> taxonomy_core::Result<serde_json::Value> {
    ensure_concepts_loaded(state, run_dir).map_err(io_err)?;

    // `HierarchyAssembler::assemble` requires parents to already be present
    // in the graph; feed concepts in level order (not `flatten()`'s id
    // order) so every parent is inserted before its children.
    let ordered: Vec<Concept> = {
        let st = state.borrow();
        (0u8..4).flat_map(|lvl| st.concepts.by_level[lvl as usize].clone()).collect()
    };

    let assembler = HierarchyAssembler::new(&settings.policies.hierarchy, counters);
    let (graph, orphans) = assembler.assemble(ordered);
    let report = assembler.validate(&graph, &orphans, Utc::now());

    let concepts: Vec<&Concept> = graph.concepts().collect();
    write_jsonl(&run_dir.join("hierarchy").join("concepts.jsonl"), &concepts).map_err(io_err)?;
    write_json(&run_dir.join("hierarchy").join("report.json"), &report).map_err(io_err)?;

    if !report.passed {
        return Err(CoreError::GraphInvariant(format!(
            "hierarchy validation failed: {} violation(s), {} orphan(s)",
            report.violations.len(),
            orphans.dropped.len() + orphans.quarantined.len() + orphans.attached_placeholder.len()
        )));
    }

    Ok(serde_json::json!({
        "concepts_final": concepts.len(),
        "graph_stats": report.graph_stats,
    }))
}

/// Resolves the active [`Settings`] and an `Arc<dyn LlmClient>` for `args`.
fn build_settings_and_client(config_dir: &Path, environment: &str, args: &RunArgs) -> Result<(Settings, Arc<dyn LlmClient>)> {
    let settings = Settings::load(config_dir, environment).context("loading settings")?;
    let client: Arc<dyn LlmClient> = match &args.llm_url {
        Some(url) => Arc::new(HttpLlmClient::new(url.clone(), args.llm_api_key.clone(), &settings.policies.llm).context("building LLM gateway client")?),
        None => Arc::new(NullLlmClient),
    };
    Ok((settings, client))
}

fn default_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%3fZ"))
}

/// Runs (or resumes) one pipeline invocation end to end, returning the run
/// manifest. `args.resume_phase` overrides the default resume-after-last-
/// checkpoint behavior; pass `None` there for a fresh run's first attempt.
pub fn execute(args: &RunArgs, config_dir: &Path, environment: &str) -> Result<RunManifest> {
    let (settings, llm_client) = build_settings_and_client(config_dir, environment, args)?;

    let run_id = args.run_id.clone().unwrap_or_else(default_run_id);
    let run_dir = settings.paths.output_dir.join(&run_id);
    let checkpoint_dir = run_dir.join(&settings.policies.orchestration.checkpoint_dir);

    let input_blocks: Vec<InputBlock> = read_jsonl(&args.input).with_context(|| format!("reading input blocks from {}", args.input.display()))?;
    let evidence_snapshots: Vec<taxonomy_core::types::PageSnapshot> = match &args.evidence {
        Some(path) => read_jsonl(path).with_context(|| format!("reading evidence snapshots from {}", path.display()))?,
        None => Vec::new(),
    };

    let state = Rc::new(RefCell::new(PipelineState::default()));
    let settings_rc = Rc::new(settings.clone());

    let mut orchestrator = Orchestrator::new(run_id.clone(), environment.to_string(), settings.policies.policy_version.clone(), checkpoint_dir);

    let mut runners: BTreeMap<&'static str, Box<dyn PhaseRunner>> = BTreeMap::new();

    for (phase_name, level) in [(PHASES[0], 0u8), (PHASES[1], 1u8), (PHASES[2], 2u8), (PHASES[3], 3u8)] {
        let state = Rc::clone(&state);
        let settings = settings.clone();
        let llm_client = Arc::clone(&llm_client);
        let input_blocks = input_blocks.clone();
        let run_dir = run_dir.clone();
        runners.insert(
            phase_name,
            Box::new(move |counters: &CounterRegistry, _operations: &OperationLog| run_level(level, &state, &settings, llm_client.as_ref(), &input_blocks, &run_dir, counters)),
        );
    }

    {
        let state = Rc::clone(&state);
        let settings = settings.clone();
        let run_dir = run_dir.clone();
        runners.insert(PHASES[4], Box::new(move |counters: &CounterRegistry, _operations: &OperationLog| run_consolidation(&state, &settings, &run_dir, counters)));
    }

    {
        let state = Rc::clone(&state);
        let settings_rc = Rc::clone(&settings_rc);
        let run_dir = run_dir.clone();
        let evidence_snapshots = evidence_snapshots.clone();
        let llm_client = Arc::clone(&llm_client);
        runners.insert(
            PHASES[5],
            Box::new(move |counters: &CounterRegistry, operations: &OperationLog| {
                run_post_processing_phase(&state, &settings_rc, &run_dir, &evidence_snapshots, &llm_client, counters, operations)
            }),
        );
    }

    {
        let state = Rc::clone(&state);
        let run_dir = run_dir.clone();
        runners.insert(PHASES[6], Box::new(move |_counters: &CounterRegistry, _operations: &OperationLog| run_resume_summary(&state, &run_dir)));
    }

    {
        let state = Rc::clone(&state);
        let settings = settings.clone();
        let run_dir = run_dir.clone();
        runners.insert(PHASES[7], Box::new(move |counters: &CounterRegistry, _operations: &OperationLog| run_finalization(&state, &settings, &run_dir, counters)));
    }

    let artifacts: Vec<String> = ["S0", "S1", "S2", "S3", "quarantine", "dedup", "disambig", "validation", "hierarchy"].iter().map(|s| s.to_string()).collect();

    let manifest = orchestrator.run(runners, args.resume_phase.as_deref(), artifacts, Utc::now)?;
    write_json(&run_dir.join("run_manifest.json"), &manifest)?;
    Ok(manifest)
}

/// Loads a previously written run manifest.
pub fn load_manifest(output_dir: &Path, run_id: &str) -> Result<RunManifest> {
    read_json(&output_dir.join(run_id).join("run_manifest.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concept_id_is_deterministic_and_parent_sensitive() {
        let a = concept_id(1, "machine learning", &["c0-root".to_string()]);
        let b = concept_id(1, "machine learning", &["c0-root".to_string()]);
        let c = concept_id(1, "machine learning", &["c0-other".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("c1-"));
    }

    #[test]
    fn concept_id_distinguishes_level() {
        let a = concept_id(0, "physics", &[]);
        let b = concept_id(1, "physics", &[]);
        assert_ne!(a, b);
    }

    fn merge_op(winner: &str, losers: &[&str]) -> MergeOp {
        MergeOp::new(format!("op-{winner}"), vec![winner.to_string()], losers.iter().map(|s| s.to_string()).collect(), "exact_match", None, Utc::now()).unwrap()
    }

    #[test]
    fn build_remap_maps_every_loser_to_its_winner() {
        let ops = vec![merge_op("w1", &["l1", "l2"]), merge_op("w2", &["l3"])];
        let remap = build_remap(&ops);
        assert_eq!(remap.get("l1"), Some(&"w1".to_string()));
        assert_eq!(remap.get("l2"), Some(&"w1".to_string()));
        assert_eq!(remap.get("l3"), Some(&"w2".to_string()));
        assert_eq!(remap.len(), 3);
    }

    #[test]
    fn apply_evidence_remap_merges_loser_into_winner_and_removes_loser() {
        let mut evidence = BTreeMap::new();
        evidence.insert(
            "loser".to_string(),
            ConceptEvidence { institutions: ["inst-a".to_string()].into_iter().collect(), contexts: vec![ContextWindow { source_id: "s1".into(), tokens: vec!["a".into()] }] },
        );
        evidence.insert("winner".to_string(), ConceptEvidence { institutions: ["inst-b".to_string()].into_iter().collect(), contexts: Vec::new() });

        let mut remap = BTreeMap::new();
        remap.insert("loser".to_string(), "winner".to_string());
        apply_evidence_remap(&mut evidence, &remap);

        assert!(!evidence.contains_key("loser"));
        let merged = &evidence["winner"];
        assert_eq!(merged.institutions.len(), 2);
        assert_eq!(merged.contexts.len(), 1);
    }

    #[test]
    fn evidence_records_round_trip() {
        let mut evidence = BTreeMap::new();
        evidence.insert(
            "c1".to_string(),
            ConceptEvidence { institutions: ["inst-a".to_string(), "inst-b".to_string()].into_iter().collect(), contexts: vec![ContextWindow { source_id: "s1".into(), tokens: vec!["x".into(), "y".into()] }] },
        );
        let records = evidence_to_records(&evidence);
        let restored = records_to_evidence(records);
        assert_eq!(restored["c1"].institutions, evidence["c1"].institutions);
        assert_eq!(restored["c1"].contexts.len(), 1);
        assert_eq!(restored["c1"].contexts[0].tokens, vec!["x".to_string(), "y".to_string()]);
    }
}
