//! OCR: text acquisition from page images.
//!
//! [`OcrEngine`] is the optional capability boundary. Callers probe
//! [`OcrEngine::is_available`] before [`OcrEngine::run_ocr`]; an engine that
//! is not available is simply skipped by the pipeline.
//!
//! [`VisionOcr`] rasterises each page, sends it to a vision LLM and
//! harvests GFM pipe tables from the transcript.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient under concurrent load.
//! Failed calls back off exponentially (`retry_backoff_ms * 2^attempt`): with
//! a 500 ms base and 3 retries the waits are 500 ms → 1 s → 2 s.

use super::{clean, render, tables};
use crate::config::{OcrConfig, PipelineConfig};
use crate::error::StageError;
use crate::output::Table;
use crate::prompts::DEFAULT_OCR_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Output of an OCR run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrOutput {
    pub text: String,
    pub tables: Vec<Table>,
    /// Pages seen, when the engine knows.
    pub page_count: Option<usize>,
}

/// Optional OCR capability.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether `run_ocr` can be called at all.
    async fn is_available(&self) -> bool;

    /// Transcribe the document in `bytes`.
    async fn run_ocr(&self, bytes: &[u8]) -> Result<OcrOutput, StageError>;
}

/// Vision-LLM OCR over pdfium-rendered pages.
pub struct VisionOcr {
    config: OcrConfig,
    tables: PipelineConfig,
    provider: OnceCell<Option<Arc<dyn LLMProvider>>>,
}

impl VisionOcr {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            config,
            tables: PipelineConfig::default(),
            provider: OnceCell::new(),
        }
    }

    /// Heuristics used when titling tables found in transcripts.
    pub fn with_table_config(mut self, tables: PipelineConfig) -> Self {
        self.tables = tables;
        self
    }

    /// The resolved provider, resolving it on first use.
    async fn provider(&self) -> Option<Arc<dyn LLMProvider>> {
        self.provider
            .get_or_init(|| async {
                match resolve_provider(&self.config) {
                    Ok(provider) => {
                        info!("OCR provider resolved");
                        Some(provider)
                    }
                    Err(detail) => {
                        debug!("OCR unavailable: {}", detail);
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    fn name(&self) -> &str {
        "vision-llm"
    }

    async fn is_available(&self) -> bool {
        self.provider().await.is_some()
    }

    async fn run_ocr(&self, bytes: &[u8]) -> Result<OcrOutput, StageError> {
        let provider = self.provider().await.ok_or(StageError::OcrUnavailable)?;

        let rendered = render::render_pages(bytes, &self.config).await?;
        let page_count = rendered.len();

        let mut encoded = Vec::with_capacity(page_count);
        for (idx, img) in &rendered {
            match encode_page(img) {
                Ok(data) => encoded.push((*idx, data)),
                Err(e) => warn!("Failed to encode page {}: {}", idx + 1, e),
            }
        }
        drop(rendered);

        let mut pages: Vec<(usize, Result<String, String>)> =
            stream::iter(encoded.into_iter().map(|(idx, data)| {
                let provider = Arc::clone(&provider);
                async move {
                    let result = transcribe_page(&provider, idx + 1, data, &self.config).await;
                    (idx, result)
                }
            }))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        pages.sort_by_key(|(idx, _)| *idx);

        let mut transcripts = Vec::with_capacity(pages.len());
        let mut last_error = None;
        for (idx, result) in pages {
            match result {
                Ok(markdown) => transcripts.push(clean::clean_transcript(&markdown)),
                Err(e) => {
                    warn!("Page {}: OCR failed: {}", idx + 1, e);
                    last_error = Some(e);
                }
            }
        }

        if transcripts.is_empty() {
            return Err(StageError::OcrFailed {
                detail: last_error.unwrap_or_else(|| "document has no pages".into()),
            });
        }

        let text = transcripts.join("\n\n");
        let tables = tables::markdown_tables(&text, &self.tables);
        info!(
            "OCR transcribed {}/{} pages, {} tables",
            transcripts.len(),
            page_count,
            tables.len()
        );

        Ok(OcrOutput {
            text,
            tables,
            page_count: Some(page_count),
        })
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a pre-built provider in the config;
/// 2. a named provider plus optional model;
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. whatever `ProviderFactory::from_env` detects.
fn resolve_provider(config: &OcrConfig) -> Result<Arc<dyn LLMProvider>, String> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return ProviderFactory::create_llm_provider(name, model)
            .map_err(|e| format!("{name}: {e}"));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return ProviderFactory::create_llm_provider(&prov, &env_model)
                .map_err(|e| format!("{prov}: {e}"));
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return ProviderFactory::create_llm_provider("openai", model)
            .map_err(|e| format!("openai: {e}"));
    }

    ProviderFactory::from_env()
        .map(|(llm, _embedding)| llm)
        .map_err(|e| format!("no provider in environment: {e}"))
}

/// Encode a rendered page as a base64 PNG for the vision API.
///
/// PNG keeps glyph edges crisp; `detail: "high"` lets the model see fine
/// print and small table cells.
fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Transcribe one page, retrying failed calls with exponential backoff.
async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    image: ImageData,
    config: &OcrConfig,
) -> Result<String, String> {
    let prompt = config.system_prompt.as_deref().unwrap_or(DEFAULT_OCR_PROMPT);
    let messages = vec![
        ChatMessage::system(prompt),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = build_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_err = String::from("no attempt made");
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens",
                    page_num, response.prompt_tokens, response.completion_tokens
                );
                return Ok(response.content);
            }
            Ok(Err(e)) => last_err = e.to_string(),
            Err(_) => last_err = format!("timed out after {}s", config.api_timeout_secs),
        }
        warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, last_err);
    }

    Err(format!(
        "page {} failed after {} retries: {}",
        page_num, config.max_retries, last_err
    ))
}

/// Delay before retry number `attempt` (1-based).
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

fn build_options(config: &OcrConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
