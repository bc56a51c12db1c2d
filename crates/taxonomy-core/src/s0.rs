//! S0: raw extraction and segmentation (component D).
//!
//! Converts a stream of [`PageSnapshot`]s (or pre-segmented institutional
//! workbook rows, via [`RawBlock::Excel`]) into a stream of [`SourceRecord`]s,
//! applying the language gate, block segmentation/classification, boilerplate
//! and length filters, and intra-page shingle dedup described in spec §4.D.

use std::collections::BTreeMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ExtractionPolicy;
use crate::error::Result;
use crate::normalize::dedup_by_shingles;
use crate::observability::{CounterRegistry, QuarantineStore};
use crate::types::{PageSnapshot, Provenance, SourceMeta, SourceRecord};

/// A block's structural classification, assigned during segmentation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// A section header line.
    Header,
    /// A list item line.
    ListItem,
    /// A table row.
    TableRow,
    /// An ordinary paragraph line (or run of lines).
    Paragraph,
}

/// A second input shape S0 accepts alongside web snapshots: a pre-segmented
/// row from an institutional workbook. The actual `.xlsx` parsing is an
/// external collaborator; this only carries the already-extracted cell text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcelRow {
    /// Owning institution.
    pub institution: String,
    /// Sheet or section name.
    pub section: Option<String>,
    /// Row text.
    pub text: String,
    /// Declared language, if any.
    pub language: Option<String>,
}

/// Unifies the two S0 input shapes so segmentation/filtering is shared.
#[derive(Debug, Clone)]
pub enum RawBlock {
    /// A web page snapshot.
    Snapshot(PageSnapshot, Option<f64>),
    /// A pre-segmented institutional workbook row.
    Excel(ExcelRow),
}

impl RawBlock {
    /// Construct a web-snapshot raw block with an optional language confidence.
    #[must_use]
    pub fn from_snapshot(snapshot: PageSnapshot, language_confidence: Option<f64>) -> Self {
        Self::Snapshot(snapshot, language_confidence)
    }

    /// Construct an excel-row raw block.
    #[must_use]
    pub fn from_excel_row(row: ExcelRow) -> Self {
        Self::Excel(row)
    }
}

static HEADER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S|^[A-Z][A-Za-z0-9 ,&'-]{2,60}:?$").unwrap());
static LIST_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([-*•]|\d+[.)])\s+").unwrap());
static TABLE_PIPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\|").unwrap());

fn classify_line(line: &str) -> BlockType {
    if HEADER_PATTERN.is_match(line.trim()) && line.trim().len() < 80 {
        return BlockType::Header;
    }
    if LIST_MARKER.is_match(line) {
        return BlockType::ListItem;
    }
    let pipe_count = TABLE_PIPE.find_iter(line).count();
    let tab_count = line.matches('\t').count();
    if pipe_count >= 2 || tab_count >= 2 {
        return BlockType::TableRow;
    }
    BlockType::Paragraph
}

fn normalize_block_whitespace(text: &str, block_type: BlockType) -> String {
    if block_type == BlockType::ListItem {
        text.lines().map(str::trim).collect::<Vec<_>>().join("\n")
    } else {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// A segmented, classified block prior to filtering.
#[derive(Debug, Clone)]
struct SegmentedBlock {
    text: String,
    block_type: BlockType,
    order: usize,
}

fn segment(text: &str) -> Vec<SegmentedBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_type: Option<BlockType> = None;
    let mut order = 0usize;

    let mut flush = |current: &mut Vec<&str>, current_type: &mut Option<BlockType>, order: &mut usize, blocks: &mut Vec<SegmentedBlock>| {
        if current.is_empty() {
            return;
        }
        let block_type = current_type.unwrap_or(BlockType::Paragraph);
        let raw = current.join("\n");
        let normalized = normalize_block_whitespace(&raw, block_type);
        if !normalized.trim().is_empty() {
            blocks.push(SegmentedBlock { text: normalized, block_type, order: *order });
            *order += 1;
        }
        current.clear();
        *current_type = None;
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut current_type, &mut order, &mut blocks);
            continue;
        }
        let kind = classify_line(line);
        if kind == BlockType::Header {
            flush(&mut current, &mut current_type, &mut order, &mut blocks);
            blocks.push(SegmentedBlock { text: line.trim().to_string(), block_type: BlockType::Header, order });
            order += 1;
            continue;
        }
        if let Some(existing) = current_type {
            if existing != kind {
                flush(&mut current, &mut current_type, &mut order, &mut blocks);
            }
        }
        current_type = Some(kind);
        current.push(line);
    }
    flush(&mut current, &mut current_type, &mut order, &mut blocks);
    blocks
}

fn language_base(lang: &str) -> String {
    lang.split(['-', '_']).next().unwrap_or(lang).to_lowercase()
}

fn passes_language_gate(policy: &ExtractionPolicy, lang: Option<&str>, confidence: Option<f64>) -> bool {
    let Some(target) = policy.target_language.as_deref() else { return true };
    let Some(lang) = lang else { return false };
    if language_base(lang) != language_base(target) {
        return false;
    }
    let confidence = confidence.unwrap_or(0.0);
    confidence >= policy.min_language_confidence
}

fn is_boilerplate(text: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

fn compile_boilerplate(policy: &ExtractionPolicy) -> Vec<Regex> {
    policy.boilerplate_patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Processes a stream of [`RawBlock`]s into [`SourceRecord`]s, recording
/// counters and quarantine items as it goes. Never halts on a per-item error.
pub struct S0Processor<'a> {
    policy: &'a ExtractionPolicy,
    counters: &'a CounterRegistry,
    quarantine: &'a QuarantineStore,
}

impl<'a> S0Processor<'a> {
    /// Construct a processor bound to the given policy and observability sinks.
    #[must_use]
    pub fn new(policy: &'a ExtractionPolicy, counters: &'a CounterRegistry, quarantine: &'a QuarantineStore) -> Self {
        Self { policy, counters, quarantine }
    }

    /// Process one raw block, emitting zero or more [`SourceRecord`]s.
    pub fn process(&self, block: RawBlock) -> Result<Vec<SourceRecord>> {
        let boilerplate = compile_boilerplate(self.policy);
        match block {
            RawBlock::Snapshot(snapshot, confidence) => self.process_snapshot(snapshot, confidence, &boilerplate),
            RawBlock::Excel(row) => self.process_excel(row, &boilerplate),
        }
    }

    fn process_snapshot(&self, snapshot: PageSnapshot, confidence: Option<f64>, boilerplate: &[Regex]) -> Result<Vec<SourceRecord>> {
        let _ = self.counters.increment("S0", "pages_seen", 1);
        let result = (|| -> Result<Vec<SourceRecord>> {
            if !passes_language_gate(self.policy, snapshot.lang.as_deref(), confidence) {
                let _ = self.counters.increment("S0", "pages_language_skipped", 1);
                return Ok(Vec::new());
            }
            if let Some(lang) = &snapshot.lang {
                let _ = self.counters.increment_labelled("S0", "by_language", &language_base(lang), 1);
            }
            let segmented = segment(&snapshot.text);
            self.emit_records(segmented, boilerplate, &snapshot.institution, snapshot.url.clone(), confidence, "web")
        })();

        match result {
            Ok(records) => Ok(records),
            Err(e) => {
                let _ = self.counters.increment("S0", "pages_failed", 1);
                self.quarantine.record(
                    "S0",
                    Some(snapshot.institution.clone()),
                    Some(snapshot.url.clone()),
                    e.to_string(),
                    serde_json::to_string(&snapshot).unwrap_or_default(),
                );
                Ok(Vec::new())
            }
        }
    }

    fn process_excel(&self, row: ExcelRow, boilerplate: &[Regex]) -> Result<Vec<SourceRecord>> {
        let _ = self.counters.increment("S0", "pages_seen", 1);
        let result = (|| -> Result<Vec<SourceRecord>> {
            if !passes_language_gate(self.policy, row.language.as_deref(), Some(1.0)) {
                let _ = self.counters.increment("S0", "pages_language_skipped", 1);
                return Ok(Vec::new());
            }
            let segmented = segment(&row.text);
            self.emit_records(segmented, boilerplate, &row.institution, None, Some(1.0), "excel")
        })();

        match result {
            Ok(records) => Ok(records),
            Err(e) => {
                let _ = self.counters.increment("S0", "pages_failed", 1);
                self.quarantine.record("S0", Some(row.institution.clone()), None, e.to_string(), serde_json::to_string(&row).unwrap_or_default());
                Ok(Vec::new())
            }
        }
    }

    fn emit_records(
        &self,
        segmented: Vec<SegmentedBlock>,
        boilerplate: &[Regex],
        institution: &str,
        url: Option<String>,
        confidence: Option<f64>,
        source: &str,
    ) -> Result<Vec<SourceRecord>> {
        let _ = self.counters.increment("S0", "blocks_total", segmented.len() as i64);

        let mut survivors = Vec::new();
        for block in segmented {
            if is_boilerplate(&block.text, boilerplate) {
                let _ = self.counters.increment("S0", "boilerplate_removed", 1);
                continue;
            }
            let len = block.text.chars().count();
            if len < self.policy.min_chars || len > self.policy.max_chars {
                let _ = self.counters.increment("S0", "blocks_filtered_length", 1);
                continue;
            }
            survivors.push(block);
        }

        let texts: Vec<String> = survivors.iter().map(|b| b.text.clone()).collect();
        let kept_indices = dedup_by_shingles(&texts, 3, 0.9);
        let deduped_count = survivors.len() - kept_indices.len();
        let _ = self.counters.increment("S0", "blocks_deduped", deduped_count as i64);

        let mut records = Vec::with_capacity(kept_indices.len());
        for idx in kept_indices {
            let block = &survivors[idx];
            let mut hints = BTreeMap::new();
            hints.insert("source".to_string(), source.to_string());
            hints.insert("level".to_string(), "S0".to_string());
            hints.insert("block_type".to_string(), format!("{:?}", block.block_type).to_lowercase());
            hints.insert("order".to_string(), block.order.to_string());
            if let Some(c) = confidence {
                hints.insert("language_confidence".to_string(), c.to_string());
            }
            let provenance = Provenance::new(institution.to_string(), url.clone(), None, Utc::now())?;
            let meta = SourceMeta { hints, ..SourceMeta::default() };
            records.push(SourceRecord::new(block.text.clone(), provenance, meta)?);
        }
        let _ = self.counters.increment("S0", "blocks_kept", records.len() as i64);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapshotMeta;

    fn snapshot(text: &str, lang: &str) -> PageSnapshot {
        PageSnapshot {
            institution: "Stanford".into(),
            url: "https://stanford.edu/engineering".into(),
            canonical_url: None,
            fetched_at: Utc::now(),
            http_status: 200,
            content_type: "text/html".into(),
            html: None,
            text: text.to_string(),
            lang: Some(lang.to_string()),
            checksum: PageSnapshot::checksum_of(text),
            meta: SnapshotMeta::default(),
        }
    }

    #[test]
    fn segments_headers_lists_and_paragraphs() {
        let text = "Department of Engineering\n\nWe offer the following programs:\n- Computer Science\n- Electrical Engineering\n\nApply online today.";
        let blocks = segment(text);
        assert!(blocks.iter().any(|b| b.block_type == BlockType::Header));
        assert!(blocks.iter().any(|b| b.block_type == BlockType::ListItem));
        assert!(blocks.iter().any(|b| b.block_type == BlockType::Paragraph));
    }

    #[test]
    fn language_gate_skips_non_target_language() {
        let policy = ExtractionPolicy { target_language: Some("en".into()), ..ExtractionPolicy::default() };
        let counters = CounterRegistry::new(None);
        let quarantine = QuarantineStore::new();
        let processor = S0Processor::new(&policy, &counters, &quarantine);
        let snap = snapshot("Bienvenue a la Faculte de Genie, un excellent programme.", "fr");
        let records = processor.process(RawBlock::from_snapshot(snap, Some(0.9))).unwrap();
        assert!(records.is_empty());
        assert_eq!(counters.snapshot().counters["S0"]["pages_language_skipped"], serde_json::json!(1));
    }

    #[test]
    fn length_bounds_filter_short_blocks() {
        let policy = ExtractionPolicy { min_chars: 20, ..ExtractionPolicy::default() };
        let counters = CounterRegistry::new(None);
        let quarantine = QuarantineStore::new();
        let processor = S0Processor::new(&policy, &counters, &quarantine);
        let snap = snapshot("Too short", "en");
        let records = processor.process(RawBlock::from_snapshot(snap, Some(1.0))).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn excel_row_is_accepted_and_tagged() {
        let policy = ExtractionPolicy::default();
        let counters = CounterRegistry::new(None);
        let quarantine = QuarantineStore::new();
        let processor = S0Processor::new(&policy, &counters, &quarantine);
        let row = ExcelRow { institution: "MIT".into(), section: Some("Faculty".into()), text: "Department of Computer Science offers many programs.".into(), language: Some("en".into()) };
        let records = processor.process(RawBlock::from_excel_row(row)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].meta.hints.get("source").map(String::as_str), Some("excel"));
    }
}
