//! In-process fakes shared by the integration tests.
//!
//! `FakeParser` treats the input bytes as UTF-8 text. Inputs starting with
//! `CORRUPT` fail to parse, inputs starting with `PANIC` panic. `FakeOcr`
//! returns a fixed transcript. Both count their calls.

#![allow(dead_code)]

use async_trait::async_trait;
use ledgerdoc::pipeline::{EmbeddedMetadata, OcrEngine, OcrOutput, ParsedText, TextParser};
use ledgerdoc::{CachedExtractor, ExtractionPipeline, MemoryCacheStore, StageError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct FakeParser {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl FakeParser {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextParser for FakeParser {
    fn name(&self) -> &str {
        "fake-parser"
    }

    async fn parse_text(&self, bytes: &[u8]) -> Result<ParsedText, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if bytes.starts_with(b"PANIC") {
            panic!("parser exploded");
        }
        if bytes.starts_with(b"CORRUPT") {
            return Err(StageError::ParseFailed {
                detail: "broken xref table".into(),
            });
        }
        Ok(ParsedText {
            text: String::from_utf8_lossy(bytes).into_owned(),
            page_count: 1,
            metadata: EmbeddedMetadata {
                title: Some("Fake Ledger".into()),
                author: Some("Accounts".into()),
                page_count: Some(1),
            },
        })
    }
}

pub struct FakeOcr {
    pub calls: AtomicUsize,
    pub transcript: String,
}

impl FakeOcr {
    pub fn new(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            transcript: transcript.to_string(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    fn name(&self) -> &str {
        "fake-ocr"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn run_ocr(&self, _bytes: &[u8]) -> Result<OcrOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OcrOutput {
            text: self.transcript.clone(),
            tables: Vec::new(),
            page_count: Some(1),
        })
    }
}

/// Text long enough to pass the standard-extraction threshold.
pub fn ledger_text() -> String {
    let mut text = String::from("General ledger for March 2024, prepared 2024-04-02.\n");
    text.push_str("Revenue grew 12.5% while operating costs held at $48,200.00.\n");
    text.push_str("Questions: finance@example.com\n\n");
    text.push_str("Account       Debit       Credit\n");
    text.push_str("Cash          1,200.00    0.00\n");
    text.push_str("Receivables   0.00        1,200.00\n");
    text.push_str("Inventory     350.00      0.00\n");
    text
}

pub fn memory_extractor(
    parser: Arc<FakeParser>,
    ocr: Option<Arc<FakeOcr>>,
) -> (Arc<MemoryCacheStore>, CachedExtractor) {
    let mut builder = ExtractionPipeline::builder().parser(parser);
    if let Some(ocr) = ocr {
        builder = builder.ocr(ocr);
    }
    let store = Arc::new(MemoryCacheStore::new());
    let extractor = CachedExtractor::new(Arc::new(builder.build()), store.clone());
    (store, extractor)
}
