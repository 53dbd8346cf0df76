//! Error types for the ledgerdoc library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: no usable text could be acquired from the
//!   document at all (not a PDF, corrupt with no OCR fallback), or the caller
//!   supplied invalid input/configuration. Returned as `Err(ExtractError)`
//!   from the pipeline and the cached façade.
//!
//! * [`StageError`] — **Non-fatal**: a single pipeline stage failed (OCR
//!   timed out, table detection blew up, metadata unreadable). The pipeline
//!   logs it and degrades that stage to empty/default output.
//!
//! * [`CacheError`] — the cache store could not read or write an entry. The
//!   cached façade treats read failures as misses and write failures as
//!   warnings, so a broken cache never costs the caller a result.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ledgerdoc library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The document buffer is empty.
    #[error("Document '{filename}' is empty")]
    EmptyInput { filename: String },

    /// [`crate::fingerprint()`] was given an empty buffer.
    #[error("Cannot fingerprint an empty buffer")]
    EmptyBuffer,

    /// The bytes do not start with the `%PDF` magic.
    #[error("Document '{filename}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotADocument { filename: String, magic: Vec<u8> },

    /// Standard extraction failed and OCR was unavailable or failed too.
    #[error("No text could be acquired from '{filename}': {detail}")]
    Unreadable { filename: String, detail: String },

    /// Reading a document from disk failed.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of a single pipeline stage.
///
/// Capabilities ([`crate::pipeline::TextParser`], [`crate::pipeline::OcrEngine`],
/// table detectors, entity extractors) return this type; the pipeline decides
/// whether to fall back, default, or (only when no text at all could be
/// acquired) escalate to [`ExtractError::Unreadable`].
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// Standard text extraction failed (corrupt stream, encrypted, …).
    #[error("text extraction failed: {detail}")]
    ParseFailed { detail: String },

    /// No OCR engine is configured or it reported itself unavailable.
    #[error("OCR is not available")]
    OcrUnavailable,

    /// OCR ran but failed.
    #[error("OCR failed: {detail}")]
    OcrFailed { detail: String },

    /// OCR exceeded its wall-clock budget.
    #[error("OCR timed out after {secs}s")]
    OcrTimeout { secs: u64 },

    /// A table detector failed.
    #[error("table detection failed: {detail}")]
    TableDetection { detail: String },

    /// Embedded metadata could not be read.
    #[error("metadata extraction failed: {detail}")]
    Metadata { detail: String },

    /// Entity extraction failed.
    #[error("entity extraction failed: {detail}")]
    Entities { detail: String },
}

/// Errors raised by a [`crate::cache::CacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem access to the store failed.
    #[error("cache I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An entry could not be encoded or decoded.
    #[error("cache entry at '{path}' is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serialising an entry for storage failed.
    #[error("failed to serialise cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The tenant id is empty.
    #[error("invalid tenant id: {0:?}")]
    InvalidTenant(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_display_names_file() {
        let e = ExtractError::Unreadable {
            filename: "q3-statement.pdf".into(),
            detail: "xref table missing".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("q3-statement.pdf"), "got: {msg}");
        assert!(msg.contains("xref table missing"), "got: {msg}");
    }

    #[test]
    fn ocr_timeout_display() {
        let e = StageError::OcrTimeout { secs: 300 };
        assert!(e.to_string().contains("300s"));
    }

    #[test]
    fn stage_error_round_trips_through_json() {
        let e = StageError::TableDetection {
            detail: "bad region".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: StageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn invalid_tenant_display() {
        let e = CacheError::InvalidTenant(String::new());
        assert!(e.to_string().contains("invalid tenant"));
    }
}
