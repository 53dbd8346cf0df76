//! The extraction pipeline and its stages.
//!
//! Each submodule implements one step; [`ExtractionPipeline`] wires them
//! together and owns the fallback order between strategies.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─▶ ocr (render → VLM → clean) ─┐
//! bytes ─────┤                               ├─▶ tables ─▶ metadata ─▶ entities
//!            └─▶ parse (pdfium text layer) ──┘
//! ```
//!
//! 1. [`parse`]    — standard extraction; the document's own text layer
//! 2. [`ocr`]      — optional OCR capability, used when requested or when
//!    standard extraction fails or yields too little text
//! 3. [`clean`]    — text normalisation shared by both strategies
//! 4. [`tables`]   — structural detection with a separator-scanning fallback
//! 5. [`metadata`] — embedded metadata plus file facts
//! 6. [`entities`] — lexical entity recognition
//!
//! Only a failure to acquire any text at all is fatal. Every later stage
//! degrades to empty or default output and logs a warning.

pub mod clean;
pub mod entities;
pub mod metadata;
pub mod ocr;
pub mod parse;
pub mod render;
pub mod tables;

pub use entities::{EntityExtractor, PatternEntityExtractor};
pub use metadata::EmbeddedMetadata;
pub use ocr::{OcrEngine, OcrOutput, VisionOcr};
pub use parse::{ParsedText, PdfiumParser, TextParser};
pub use tables::{AlignedColumnDetector, TableDetector, TableRegion};

use crate::config::{ExtractionOptions, PipelineConfig};
use crate::error::{ExtractError, StageError};
use crate::output::{ExtractionResult, Table, TextSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Bytes kept from the start of a rejected input for error reports.
const MAGIC_PREVIEW_LEN: usize = 8;

/// A document to extract: raw bytes plus the name it arrived under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Source path, when read from disk. Used for file timestamps.
    pub path: Option<PathBuf>,
}

impl DocumentInput {
    /// An in-memory document.
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
            path: None,
        }
    }

    /// Read a document from disk.
    ///
    /// # Errors
    /// [`ExtractError::Io`] if the file cannot be read,
    /// [`ExtractError::EmptyInput`] if it is empty.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if bytes.is_empty() {
            return Err(ExtractError::EmptyInput { filename });
        }
        Ok(Self {
            filename,
            bytes,
            path: Some(path.to_path_buf()),
        })
    }
}

/// Text produced by the acquisition stage.
struct Acquired {
    text: String,
    tables: Vec<Table>,
    page_count: Option<usize>,
    embedded: Option<EmbeddedMetadata>,
    source: TextSource,
}

impl Acquired {
    fn from_ocr(out: OcrOutput) -> Self {
        Self {
            text: out.text,
            tables: out.tables,
            page_count: out.page_count,
            embedded: None,
            source: TextSource::Ocr,
        }
    }

    fn from_parsed(parsed: ParsedText) -> Self {
        Self {
            text: parsed.text,
            tables: Vec::new(),
            page_count: Some(parsed.page_count),
            embedded: Some(parsed.metadata),
            source: TextSource::Standard,
        }
    }
}

/// Multi-strategy extraction: text, tables, metadata and entities.
///
/// Cheap to share behind an `Arc`; holds no per-call state.
pub struct ExtractionPipeline {
    parser: Arc<dyn TextParser>,
    ocr: Option<Arc<dyn OcrEngine>>,
    detector: Arc<dyn TableDetector>,
    entities: Arc<dyn EntityExtractor>,
    config: PipelineConfig,
}

impl ExtractionPipeline {
    pub fn builder() -> ExtractionPipelineBuilder {
        ExtractionPipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline over `input`.
    ///
    /// # Errors
    /// Only when no text can be acquired: [`ExtractError::EmptyInput`],
    /// [`ExtractError::NotADocument`] or [`ExtractError::Unreadable`].
    pub async fn extract(
        &self,
        input: &DocumentInput,
        options: &ExtractionOptions,
    ) -> Result<ExtractionResult, ExtractError> {
        if input.bytes.is_empty() {
            return Err(ExtractError::EmptyInput {
                filename: input.filename.clone(),
            });
        }
        let start = Instant::now();

        let acquired = self.acquire_text(input, options).await?;
        let text = clean::normalise_text(&acquired.text);

        let tables = if !options.extract_tables {
            Vec::new()
        } else if !acquired.tables.is_empty() {
            acquired.tables
        } else {
            tables::reconstruct_tables(&text, self.detector.as_ref(), &self.config)
        };

        let embedded = match acquired.embedded {
            Some(embedded) => Ok(embedded),
            None => self.parser.embedded_metadata(&input.bytes).await,
        };
        let metadata =
            metadata::collect_metadata(input, embedded, acquired.page_count, acquired.source)
                .await;

        let entities = if options.extract_entities {
            self.entities.extract(&text, &tables).unwrap_or_else(|e| {
                warn!("{}: {} failed: {}", input.filename, self.entities.name(), e);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        info!(
            "{}: {} chars via {:?}, {} tables, {} entities in {}ms",
            input.filename,
            text.len(),
            acquired.source,
            tables.len(),
            entities.len(),
            start.elapsed().as_millis()
        );

        Ok(ExtractionResult {
            text,
            tables,
            metadata,
            entities,
        })
    }

    /// Text acquisition with OCR/standard fallback.
    async fn acquire_text(
        &self,
        input: &DocumentInput,
        options: &ExtractionOptions,
    ) -> Result<Acquired, ExtractError> {
        let ocr = self.available_ocr().await;
        let mut ocr_error: Option<StageError> = None;

        if options.force_ocr || options.use_ocr {
            match ocr {
                Some(engine) => match self.run_ocr(engine, &input.bytes).await {
                    Ok(out) => return Ok(Acquired::from_ocr(out)),
                    Err(e) => {
                        warn!(
                            "{}: {} failed ({}); using standard extraction",
                            input.filename,
                            engine.name(),
                            e
                        );
                        ocr_error = Some(e);
                    }
                },
                None => debug!("{}: OCR requested but unavailable", input.filename),
            }
        }

        let fallback_ocr = if ocr_error.is_none() { ocr } else { None };

        match self.parser.parse_text(&input.bytes).await {
            Ok(parsed) => {
                let chars = parsed.text.trim().chars().count();
                if chars >= self.config.min_text_chars {
                    return Ok(Acquired::from_parsed(parsed));
                }
                if let Some(engine) = fallback_ocr {
                    debug!(
                        "{}: only {} chars of text; trying {}",
                        input.filename,
                        chars,
                        engine.name()
                    );
                    match self.run_ocr(engine, &input.bytes).await {
                        Ok(out) if !out.text.trim().is_empty() => {
                            let mut acquired = Acquired::from_ocr(out);
                            acquired.embedded = Some(parsed.metadata);
                            return Ok(acquired);
                        }
                        Ok(_) => debug!("{}: OCR produced no text", input.filename),
                        Err(e) => warn!(
                            "{}: {} failed ({}); keeping standard text",
                            input.filename,
                            engine.name(),
                            e
                        ),
                    }
                }
                Ok(Acquired::from_parsed(parsed))
            }
            Err(parse_error) => {
                warn!(
                    "{}: {} failed: {}",
                    input.filename,
                    self.parser.name(),
                    parse_error
                );
                if let Some(engine) = fallback_ocr {
                    match self.run_ocr(engine, &input.bytes).await {
                        Ok(out) => return Ok(Acquired::from_ocr(out)),
                        Err(e) => ocr_error = Some(e),
                    }
                }
                Err(self.fatal(input, parse_error, ocr_error))
            }
        }
    }

    async fn available_ocr(&self) -> Option<&dyn OcrEngine> {
        let engine = self.ocr.as_deref()?;
        engine.is_available().await.then_some(engine)
    }

    /// One OCR call under the wall-clock limit.
    async fn run_ocr(&self, engine: &dyn OcrEngine, bytes: &[u8]) -> Result<OcrOutput, StageError> {
        match tokio::time::timeout(self.config.ocr_timeout(), engine.run_ocr(bytes)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::OcrTimeout {
                secs: self.config.ocr_timeout_secs,
            }),
        }
    }

    fn fatal(
        &self,
        input: &DocumentInput,
        parse_error: StageError,
        ocr_error: Option<StageError>,
    ) -> ExtractError {
        if !self.parser.accepts(&input.bytes) {
            let len = input.bytes.len().min(MAGIC_PREVIEW_LEN);
            return ExtractError::NotADocument {
                filename: input.filename.clone(),
                magic: input.bytes[..len].to_vec(),
            };
        }
        let detail = match ocr_error {
            Some(ocr) => format!("{}; {}", parse_error, ocr),
            None => format!("{}; no OCR available", parse_error),
        };
        ExtractError::Unreadable {
            filename: input.filename.clone(),
            detail,
        }
    }
}

/// Builder for [`ExtractionPipeline`].
///
/// Defaults: [`PdfiumParser`], no OCR, [`AlignedColumnDetector`],
/// [`PatternEntityExtractor`], default [`PipelineConfig`].
#[derive(Default)]
pub struct ExtractionPipelineBuilder {
    parser: Option<Arc<dyn TextParser>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    detector: Option<Arc<dyn TableDetector>>,
    entities: Option<Arc<dyn EntityExtractor>>,
    config: Option<PipelineConfig>,
}

impl ExtractionPipelineBuilder {
    pub fn parser(mut self, parser: Arc<dyn TextParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn table_detector(mut self, detector: Arc<dyn TableDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn entity_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.entities = Some(extractor);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> ExtractionPipeline {
        ExtractionPipeline {
            parser: self.parser.unwrap_or_else(|| Arc::new(PdfiumParser::new())),
            ocr: self.ocr,
            detector: self
                .detector
                .unwrap_or_else(|| Arc::new(AlignedColumnDetector)),
            entities: self
                .entities
                .unwrap_or_else(|| Arc::new(PatternEntityExtractor)),
            config: self.config.unwrap_or_default(),
        }
    }
}
