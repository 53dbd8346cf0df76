//! Document metadata assembly.
//!
//! Embedded metadata (title, author, page count) comes from the parser;
//! file size and timestamps come from the input itself. Every failure here
//! degrades to defaults derived from the filename, so the result is never
//! empty and never an error.

use super::DocumentInput;
use crate::error::StageError;
use crate::output::{DocumentMetadata, TextSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Metadata stored inside the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: Option<usize>,
}

/// Facts about the input independent of its format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFacts {
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl FileFacts {
    /// Facts for an in-memory buffer: its length and the current time.
    pub fn for_buffer(len: usize) -> Self {
        let now = Utc::now();
        Self {
            file_size: len as u64,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Read size and timestamps from the filesystem.
///
/// Platforms without a creation time report the modification time instead.
pub async fn file_facts(path: &Path) -> Result<FileFacts, StageError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| StageError::Metadata {
            detail: format!("{}: {}", path.display(), e),
        })?;
    let modified = meta.modified().map_err(|e| StageError::Metadata {
        detail: format!("{}: {}", path.display(), e),
    })?;
    let created = meta.created().unwrap_or(modified);

    Ok(FileFacts {
        file_size: meta.len(),
        created_at: DateTime::<Utc>::from(created),
        modified_at: DateTime::<Utc>::from(modified),
    })
}

/// Combine embedded metadata and file facts for `input`.
///
/// `page_count` is the count observed by the text acquisition stage, used
/// when the embedded metadata has none.
pub async fn collect_metadata(
    input: &DocumentInput,
    embedded: Result<EmbeddedMetadata, StageError>,
    page_count: Option<usize>,
    source: TextSource,
) -> DocumentMetadata {
    let facts = match input.path.as_deref() {
        Some(path) => match file_facts(path).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!("{}: {}; using buffer facts", input.filename, e);
                FileFacts::for_buffer(input.bytes.len())
            }
        },
        None => FileFacts::for_buffer(input.bytes.len()),
    };

    let embedded = embedded.unwrap_or_else(|e| {
        warn!("{}: {}; using filename defaults", input.filename, e);
        EmbeddedMetadata::default()
    });
    debug!("{}: embedded metadata {:?}", input.filename, embedded);

    DocumentMetadata {
        title: embedded
            .title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| filename_title(&input.filename)),
        author: embedded.author.filter(|a| !a.trim().is_empty()),
        page_count: embedded.page_count.or(page_count).unwrap_or(0),
        file_size: facts.file_size,
        created_at: facts.created_at,
        modified_at: facts.modified_at,
        text_source: source,
    }
}

/// Title derived from a filename: its stem, if non-empty.
pub fn filename_title(filename: &str) -> Option<String> {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
}
