//! Standard text extraction: the document's own text layer.
//!
//! [`TextParser`] is the capability boundary for "parse these bytes into
//! text". [`PdfiumParser`] implements it with pdfium; tests substitute
//! in-process fakes.
//!
//! pdfium keeps thread-local state and blocks on CPU work, so every call
//! runs inside `tokio::task::spawn_blocking`.

use super::metadata::EmbeddedMetadata;
use crate::error::{ExtractError, StageError};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// Leading bytes of every PDF file.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// PDFs may carry junk before the header; pdfium accepts it within this window.
const MAGIC_SEARCH_WINDOW: usize = 1024;

/// Output of standard extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedText {
    pub text: String,
    pub page_count: usize,
    pub metadata: EmbeddedMetadata,
}

/// Extracts the text layer of a document.
#[async_trait]
pub trait TextParser: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether `bytes` look like a document this parser understands.
    fn accepts(&self, _bytes: &[u8]) -> bool {
        true
    }

    /// Parse `bytes`; fails on corrupt or unsupported input.
    async fn parse_text(&self, bytes: &[u8]) -> Result<ParsedText, StageError>;

    /// Embedded metadata only. Used when the text came from OCR.
    async fn embedded_metadata(&self, bytes: &[u8]) -> Result<EmbeddedMetadata, StageError> {
        self.parse_text(bytes).await.map(|parsed| parsed.metadata)
    }
}

/// Whether `bytes` carry a PDF header near the start.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(MAGIC_SEARCH_WINDOW)];
    window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

/// Bind to a pdfium library.
///
/// Search order: `PDFIUM_LIB_PATH`, the working directory, the system
/// library path.
pub fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(path) => Pdfium::bind_to_library(PathBuf::from(path)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{:?}", e)))
}

/// Load a PDF from memory, mapping pdfium errors to a stage error.
pub(crate) fn load_document<'a>(
    pdfium: &'a Pdfium,
    bytes: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, StageError> {
    pdfium.load_pdf_from_byte_slice(bytes, password).map_err(|e| {
        let detail = format!("{:?}", e);
        let detail = if detail.to_lowercase().contains("password") {
            match password {
                Some(_) => format!("wrong password ({})", detail),
                None => format!("password required ({})", detail),
            }
        } else {
            detail
        };
        StageError::ParseFailed { detail }
    })
}

/// [`TextParser`] backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumParser {
    password: Option<String>,
}

impl PdfiumParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open encrypted documents with `password`.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
        }
    }

    /// Fail early if no pdfium library can be bound.
    pub fn check_binding() -> Result<(), ExtractError> {
        bind_pdfium().map(|_| ())
    }

    async fn run_blocking<T, F>(&self, bytes: &[u8], f: F) -> Result<T, StageError>
    where
        T: Send + 'static,
        F: FnOnce(&PdfDocument<'_>) -> Result<T, StageError> + Send + 'static,
    {
        if !looks_like_pdf(bytes) {
            return Err(StageError::ParseFailed {
                detail: "missing %PDF header".into(),
            });
        }
        let bytes = bytes.to_vec();
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium().map_err(|e| StageError::ParseFailed {
                detail: e.to_string(),
            })?;
            let document = load_document(&pdfium, &bytes, password.as_deref())?;
            f(&document)
        })
        .await
        .map_err(|e| StageError::ParseFailed {
            detail: format!("parse task panicked: {}", e),
        })?
    }
}

#[async_trait]
impl TextParser for PdfiumParser {
    fn name(&self) -> &str {
        "pdfium"
    }

    fn accepts(&self, bytes: &[u8]) -> bool {
        looks_like_pdf(bytes)
    }

    async fn parse_text(&self, bytes: &[u8]) -> Result<ParsedText, StageError> {
        self.run_blocking(bytes, |document| {
            let pages = document.pages();
            let page_count = pages.len() as usize;
            info!("PDF loaded: {} pages", page_count);

            let mut texts = Vec::with_capacity(page_count);
            for (idx, page) in pages.iter().enumerate() {
                let text = page.text().map_err(|e| StageError::ParseFailed {
                    detail: format!("page {}: {:?}", idx + 1, e),
                })?;
                texts.push(text.all());
            }
            let text = texts.join("\n\n");
            debug!("Extracted {} chars of text", text.len());

            Ok(ParsedText {
                text,
                page_count,
                metadata: read_metadata(document),
            })
        })
        .await
    }

    async fn embedded_metadata(&self, bytes: &[u8]) -> Result<EmbeddedMetadata, StageError> {
        self.run_blocking(bytes, |document| Ok(read_metadata(document)))
            .await
    }
}

fn read_metadata(document: &PdfDocument<'_>) -> EmbeddedMetadata {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    EmbeddedMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        page_count: Some(document.pages().len() as usize),
    }
}
