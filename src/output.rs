//! Extraction output types.
//!
//! [`ExtractionResult`] is what the pipeline produces and what the cache
//! stores verbatim, so every type here is `Serialize + Deserialize` and
//! compares by value. JSON field names are camelCase because cache entries
//! and batch snapshots are consumed by non-Rust dashboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full output of one extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    /// Acquired document text (standard extraction or OCR transcript).
    pub text: String,
    /// Tables found in the document.
    pub tables: Vec<Table>,
    /// Embedded and filesystem-level document facts.
    pub metadata: DocumentMetadata,
    /// Entities recognised in the text and tables.
    pub entities: Vec<Entity>,
}

/// A reconstructed table.
///
/// Rows may be up to `column_tolerance` cells wider or narrower than the
/// header, but every row has at least one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Number of header columns.
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }
}

/// Where the text of a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// The document's own text layer.
    #[default]
    Standard,
    /// An OCR transcript.
    Ocr,
}

/// Document metadata.
///
/// Never fully empty: `file_size` and the timestamps are always filled from
/// the input, and `title` falls back to the filename stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: usize,
    /// Size of the input in bytes.
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub text_source: TextSource,
}

/// Category of a recognised entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Date,
    MonetaryAmount,
    Percentage,
    Email,
}

/// A recognised entity, deduplicated by `(kind, value)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub kind: EntityKind,
    pub value: String,
    /// How many times the value occurred across text and table cells.
    pub occurrences: usize,
}
