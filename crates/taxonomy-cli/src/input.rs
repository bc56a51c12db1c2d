//! Wire shapes for S0 input, read from the run's input JSONL.
//!
//! [`taxonomy_core::s0::RawBlock`] deliberately doesn't derive
//! `Serialize`/`Deserialize` (it's an internal union over two source
//! shapes); this module is the CLI-side equivalent that does, so runs can
//! be driven from a plain JSONL file of tagged blocks.

use serde::Deserialize;
use taxonomy_core::s0::{ExcelRow, RawBlock};
use taxonomy_core::types::PageSnapshot;

/// One line of the input JSONL: either a web page snapshot or a
/// pre-segmented workbook row, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputBlock {
    /// A web page snapshot, optionally carrying a language-detector confidence.
    Snapshot {
        /// The captured page.
        snapshot: PageSnapshot,
        /// Confidence of `snapshot.lang`, when a detector ran.
        #[serde(default)]
        language_confidence: Option<f64>,
    },
    /// A pre-segmented institutional workbook row.
    Excel(ExcelRow),
}

impl From<InputBlock> for RawBlock {
    fn from(block: InputBlock) -> Self {
        match block {
            InputBlock::Snapshot { snapshot, language_confidence } => RawBlock::from_snapshot(snapshot, language_confidence),
            InputBlock::Excel(row) => RawBlock::from_excel_row(row),
        }
    }
}
