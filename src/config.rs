//! Configuration types for extraction, caching, OCR and batches.
//!
//! Every recognised option lives in an explicit struct with a documented
//! default; nothing is read from loosely-typed option bags. Structs with
//! validation constraints are built through a builder whose `build()`
//! returns [`ExtractError::InvalidConfig`] on violation.

use crate::error::ExtractError;
use crate::fingerprint::FingerprintContext;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ── Per-call extraction options ──────────────────────────────────────────

/// Options for a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOptions {
    /// Prefer OCR over the document's text layer when OCR is available. Default: false.
    pub use_ocr: bool,
    /// Always OCR, even if the text layer looks fine. Default: false.
    pub force_ocr: bool,
    /// Reconstruct tables from the acquired text. Default: true.
    pub extract_tables: bool,
    /// Recognise entities in text and tables. Default: true.
    pub extract_entities: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            use_ocr: false,
            force_ocr: false,
            extract_tables: true,
            extract_entities: true,
        }
    }
}

/// Options for [`crate::extractor::CachedExtractor::extract_cached`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedExtractOptions {
    /// Isolation boundary the result is cached under.
    pub tenant_id: String,
    /// Skip the cache lookup and overwrite any stored entry. Default: false.
    pub force_refresh: bool,
    /// Extra fingerprint input, e.g. `{"documentType": "statement"}`.
    pub context: Option<FingerprintContext>,
    /// Entry lifetime; `None` uses the store's default TTL.
    pub ttl_secs: Option<u64>,
    /// Options forwarded to the pipeline on a miss.
    pub extraction: ExtractionOptions,
}

impl CachedExtractOptions {
    /// Default options scoped to `tenant_id`.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            force_refresh: false,
            context: None,
            ttl_secs: None,
            extraction: ExtractionOptions::default(),
        }
    }

    pub fn force_refresh(mut self, v: bool) -> Self {
        self.force_refresh = v;
        self
    }

    pub fn context(mut self, context: FingerprintContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn ttl_secs(mut self, secs: u64) -> Self {
        self.ttl_secs = Some(secs);
        self
    }

    pub fn extraction(mut self, options: ExtractionOptions) -> Self {
        self.extraction = options;
        self
    }
}

// ── Pipeline heuristics ──────────────────────────────────────────────────

/// Tunable thresholds used by the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Standard text shorter than this (in chars) triggers an OCR fallback
    /// when OCR is available. Default: 100.
    pub min_text_chars: usize,

    /// Maximum difference between a row's cell count and the header's
    /// cell count for the row to belong to the table. Default: 2.
    pub column_tolerance: usize,

    /// Consecutive non-matching lines that end a fallback table. Default: 2.
    pub max_mismatched_lines: usize,

    /// How many lines above a table header to search for its title. Default: 5.
    pub title_lookback_lines: usize,

    /// Title candidates must be shorter than this. Default: 100.
    pub title_max_chars: usize,

    /// A line is a candidate table header for a separator when the separator
    /// occurs at least this many times in it. Default: 3.
    pub min_separator_occurrences: usize,

    /// Wall-clock budget for a single OCR call. Default: 300.
    pub ocr_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 100,
            column_tolerance: 2,
            max_mismatched_lines: 2,
            title_lookback_lines: 5,
            title_max_chars: 100,
            min_separator_occurrences: 3,
            ocr_timeout_secs: 300,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn column_tolerance(mut self, n: usize) -> Self {
        self.config.column_tolerance = n;
        self
    }

    pub fn max_mismatched_lines(mut self, n: usize) -> Self {
        self.config.max_mismatched_lines = n;
        self
    }

    pub fn title_lookback_lines(mut self, n: usize) -> Self {
        self.config.title_lookback_lines = n;
        self
    }

    pub fn title_max_chars(mut self, n: usize) -> Self {
        self.config.title_max_chars = n;
        self
    }

    pub fn min_separator_occurrences(mut self, n: usize) -> Self {
        self.config.min_separator_occurrences = n;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ExtractError> {
        let c = &self.config;
        if c.max_mismatched_lines == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_mismatched_lines must be ≥ 1".into(),
            ));
        }
        if c.min_separator_occurrences == 0 {
            return Err(ExtractError::InvalidConfig(
                "min_separator_occurrences must be ≥ 1".into(),
            ));
        }
        if c.ocr_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "ocr_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Vision OCR ───────────────────────────────────────────────────────────

/// Configuration for [`crate::pipeline::ocr::VisionOcr`].
///
/// Pages are rasterised with pdfium and transcribed by a vision LLM, so the
/// knobs split into rendering (`dpi`, `max_rendered_pixels`) and model
/// calls (everything else).
#[derive(Clone)]
pub struct OcrConfig {
    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on the longest edge of a rendered page, in pixels. Default: 2000.
    ///
    /// Bounds memory on oversized pages regardless of DPI.
    pub max_rendered_pixels: u32,

    /// Concurrent page transcriptions. Default: 4.
    pub concurrency: usize,

    /// Model identifier. If None, uses `gpt-4.1-nano`.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries per page on a failed model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay; doubles per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom transcription prompt. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Password for encrypted PDFs.
    pub password: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
            password: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl OcrConfig {
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn build(self) -> Result<OcrConfig, ExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "OCR concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Cache ────────────────────────────────────────────────────────────────

/// Default entry lifetime: one day.
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// Configuration for the cache stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory of a [`crate::cache::DiskCacheStore`]. Ignored by the
    /// in-memory store.
    pub directory: PathBuf,
    /// TTL applied when the caller does not specify one. Default: 86400.
    pub default_ttl_secs: u64,
    /// Period of the background reclaimer. Default: 600.
    pub reclaim_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("ledgerdoc-cache"),
            default_ttl_secs: DEFAULT_TTL_SECS,
            reclaim_interval_secs: 600,
        }
    }
}

impl CacheConfig {
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.max(1))
    }
}

// ── Batches ──────────────────────────────────────────────────────────────

/// Options for [`crate::batch::BatchTracker::submit_batch`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Cache/extraction options applied to every file.
    pub extraction: CachedExtractOptions,
    /// Files processed at once. Default: 1 (sequential).
    pub concurrency: usize,
}

impl BatchOptions {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            extraction: CachedExtractOptions::for_tenant(tenant_id),
            concurrency: 1,
        }
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn extraction(mut self, options: CachedExtractOptions) -> Self {
        self.extraction = options;
        self
    }
}
