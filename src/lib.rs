//! # ledgerdoc
//!
//! Cached, tenant-isolated extraction of text, tables, metadata and entities
//! from financial PDF documents.
//!
//! ## Why this crate?
//!
//! Ledgers, statements and reports get uploaded again and again: the same
//! March statement arrives through three integrations, a batch is retried,
//! a dashboard re-opens a document. Extraction is expensive (pdfium parsing,
//! and for scans a vision-model OCR call per page), so results are memoised
//! by a content fingerprint, per tenant, with a TTL. One tenant can never
//! observe another tenant's entries.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes ─▶ fingerprint ─▶ cache lookup ──hit──▶ result
//!                              │
//!                             miss
//!                              ▼
//!          1. Text      standard extraction, OCR when asked or as fallback
//!          2. Clean     normalise whitespace and transcript noise
//!          3. Tables    structural detection, separator-scan fallback
//!          4. Metadata  embedded title/author + file facts
//!          5. Entities  dates, amounts, percentages, e-mails
//!                              │
//!                              ▼
//!                        cache store ─▶ result
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledgerdoc::{
//!     CachedExtractOptions, CachedExtractor, DocumentInput, ExtractionPipeline,
//!     MemoryCacheStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Arc::new(ExtractionPipeline::builder().build());
//!     let extractor = CachedExtractor::new(pipeline, Arc::new(MemoryCacheStore::new()));
//!
//!     let doc = DocumentInput::from_path("statement.pdf").await?;
//!     let result = extractor
//!         .extract_cached(&doc, &CachedExtractOptions::for_tenant("acme"))
//!         .await?;
//!     println!("{} tables, {} entities", result.tables.len(), result.entities.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ledgerdoc` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ledgerdoc = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchFile, BatchStatus, BatchTracker, FileStatus, FileTask, JobStatus};
pub use cache::{
    spawn_reclaimer, CacheEntry, CacheStats, CacheStore, DiskCacheStore, MemoryCacheStore,
};
pub use config::{
    BatchOptions, CacheConfig, CachedExtractOptions, ExtractionOptions, OcrConfig,
    OcrConfigBuilder, PipelineConfig, PipelineConfigBuilder, DEFAULT_TTL_SECS,
};
pub use error::{CacheError, ExtractError, StageError};
pub use extractor::CachedExtractor;
pub use fingerprint::{fingerprint, Fingerprint, FingerprintContext};
pub use output::{DocumentMetadata, Entity, EntityKind, ExtractionResult, Table, TextSource};
pub use pipeline::{DocumentInput, ExtractionPipeline, ExtractionPipelineBuilder};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
