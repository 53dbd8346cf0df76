//! End-to-end behaviour of the cached extraction façade over fake
//! capabilities.

mod common;

use common::{ledger_text, memory_extractor, FakeOcr, FakeParser};
use futures::future::join_all;
use ledgerdoc::{
    CacheStore, CachedExtractOptions, DocumentInput, EntityKind, ExtractError, ExtractionOptions,
    FingerprintContext, TextSource,
};
use serde_json::json;
use std::time::Duration;

fn ledger_doc() -> DocumentInput {
    DocumentInput::from_bytes("march.pdf", ledger_text().into_bytes())
}

#[tokio::test]
async fn repeat_extraction_is_served_from_cache() {
    let parser = FakeParser::new();
    let (store, extractor) = memory_extractor(parser.clone(), None);
    let opts = CachedExtractOptions::for_tenant("acme");

    let first = extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();
    let second = extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(parser.calls(), 1);

    let stats = store.stats(Some("acme")).await.unwrap();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.hit_rate, 0.5);
}

#[tokio::test]
async fn full_result_has_tables_metadata_and_entities() {
    let (_store, extractor) = memory_extractor(FakeParser::new(), None);
    let result = extractor
        .extract_cached(&ledger_doc(), &CachedExtractOptions::for_tenant("acme"))
        .await
        .unwrap();

    assert_eq!(result.metadata.text_source, TextSource::Standard);
    assert_eq!(result.metadata.title.as_deref(), Some("Fake Ledger"));
    assert_eq!(result.metadata.page_count, 1);
    assert_eq!(result.metadata.file_size, ledger_text().len() as u64);

    assert_eq!(result.tables.len(), 1);
    assert_eq!(result.tables[0].headers, vec!["Account", "Debit", "Credit"]);
    assert_eq!(result.tables[0].rows.len(), 3);

    let kinds: Vec<EntityKind> = result.entities.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EntityKind::Date));
    assert!(kinds.contains(&EntityKind::MonetaryAmount));
    assert!(kinds.contains(&EntityKind::Percentage));
    assert!(kinds.contains(&EntityKind::Email));
}

#[tokio::test]
async fn table_values_are_counted_once() {
    let mut text = ledger_text();
    text.push_str("\nHoldings\n\n| Asset | Value | Weight |\n|---|---|---|\n| Bond | $500.00 | 50% |\n");
    let doc = DocumentInput::from_bytes("holdings.pdf", text.into_bytes());

    let (_store, extractor) = memory_extractor(FakeParser::new(), None);
    let result = extractor
        .extract_cached(&doc, &CachedExtractOptions::for_tenant("acme"))
        .await
        .unwrap();

    assert_eq!(result.tables.len(), 2);
    let occurrences = |value: &str| {
        result
            .entities
            .iter()
            .find(|e| e.value == value)
            .map(|e| e.occurrences)
    };
    assert_eq!(occurrences("$500.00"), Some(1));
    assert_eq!(occurrences("50%"), Some(1));
    assert_eq!(occurrences("$48,200.00"), Some(1));
}

#[tokio::test]
async fn tenants_never_share_entries() {
    let parser = FakeParser::new();
    let (store, extractor) = memory_extractor(parser.clone(), None);

    extractor
        .extract_cached(&ledger_doc(), &CachedExtractOptions::for_tenant("acme"))
        .await
        .unwrap();
    extractor
        .extract_cached(&ledger_doc(), &CachedExtractOptions::for_tenant("globex"))
        .await
        .unwrap();

    assert_eq!(parser.calls(), 2);
    assert_eq!(store.stats(Some("acme")).await.unwrap().total_entries, 1);
    assert_eq!(store.stats(Some("globex")).await.unwrap().total_entries, 1);
    assert_eq!(store.stats(None).await.unwrap().total_entries, 2);
    assert_eq!(store.stats(Some("acme")).await.unwrap().cache_hits, 0);
}

#[tokio::test]
async fn context_is_part_of_the_key() {
    let parser = FakeParser::new();
    let (_store, extractor) = memory_extractor(parser.clone(), None);

    let mut q1 = FingerprintContext::new();
    q1.insert("period".into(), json!("2024-Q1"));
    let mut q2 = FingerprintContext::new();
    q2.insert("period".into(), json!("2024-Q2"));

    for ctx in [q1.clone(), q2, q1] {
        extractor
            .extract_cached(&ledger_doc(), &CachedExtractOptions::for_tenant("acme").context(ctx))
            .await
            .unwrap();
    }
    assert_eq!(parser.calls(), 2);
}

#[tokio::test]
async fn force_refresh_recomputes_and_overwrites() {
    let parser = FakeParser::new();
    let (store, extractor) = memory_extractor(parser.clone(), None);
    let opts = CachedExtractOptions::for_tenant("acme");

    extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();
    extractor
        .extract_cached(&ledger_doc(), &opts.clone().force_refresh(true))
        .await
        .unwrap();
    extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();

    assert_eq!(parser.calls(), 2);
    let stats = store.stats(Some("acme")).await.unwrap();
    assert_eq!(stats.total_entries, 1);
    assert_eq!((stats.cache_hits, stats.cache_misses), (1, 2));
}

#[tokio::test]
async fn expired_entries_are_recomputed() {
    let parser = FakeParser::new();
    let (_store, extractor) = memory_extractor(parser.clone(), None);
    let opts = CachedExtractOptions::for_tenant("acme").ttl_secs(0);

    extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();
    extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();

    assert_eq!(parser.calls(), 2);
}

#[tokio::test]
async fn concurrent_misses_compute_once() {
    let parser = FakeParser::with_delay(Duration::from_millis(50));
    let (store, extractor) = memory_extractor(parser.clone(), None);
    let opts = CachedExtractOptions::for_tenant("acme");
    let doc = ledger_doc();

    let results = join_all((0..8).map(|_| extractor.extract_cached(&doc, &opts))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(parser.calls(), 1);
    let stats = store.stats(Some("acme")).await.unwrap();
    assert_eq!((stats.cache_hits, stats.cache_misses), (7, 1));
}

#[tokio::test]
async fn failures_are_not_cached() {
    let parser = FakeParser::new();
    let (store, extractor) = memory_extractor(parser.clone(), None);
    let doc = DocumentInput::from_bytes("broken.pdf", b"CORRUPT%PDF-1.7".to_vec());
    let opts = CachedExtractOptions::for_tenant("acme");

    for _ in 0..2 {
        let err = extractor.extract_cached(&doc, &opts).await.unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable { .. }), "{err:?}");
    }
    assert_eq!(parser.calls(), 2);
    assert_eq!(store.stats(None).await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn short_text_falls_back_to_ocr() {
    let parser = FakeParser::new();
    let ocr = FakeOcr::new("Scanned statement\n\nClosing balance $9,120.55 on 2024-03-31");
    let (_store, extractor) = memory_extractor(parser.clone(), Some(ocr.clone()));

    let doc = DocumentInput::from_bytes("scan.pdf", b"%PDF-1.7 stub".to_vec());
    let result = extractor
        .extract_cached(&doc, &CachedExtractOptions::for_tenant("acme"))
        .await
        .unwrap();

    assert_eq!(result.metadata.text_source, TextSource::Ocr);
    assert!(result.text.contains("Closing balance"));
    assert_eq!(ocr.calls(), 1);
    assert_eq!(parser.calls(), 1);
    assert_eq!(result.metadata.title.as_deref(), Some("Fake Ledger"));
}

#[tokio::test]
async fn corrupt_document_recovers_through_ocr() {
    let ocr = FakeOcr::new("Recovered by OCR");
    let (_store, extractor) = memory_extractor(FakeParser::new(), Some(ocr.clone()));

    let doc = DocumentInput::from_bytes("broken.pdf", b"CORRUPT%PDF".to_vec());
    let result = extractor
        .extract_cached(&doc, &CachedExtractOptions::for_tenant("acme"))
        .await
        .unwrap();

    assert_eq!(result.text, "Recovered by OCR");
    assert_eq!(ocr.calls(), 1);
}

#[tokio::test]
async fn forced_ocr_skips_standard_extraction() {
    let parser = FakeParser::new();
    let ocr = FakeOcr::new("OCR text");
    let (_store, extractor) = memory_extractor(parser.clone(), Some(ocr.clone()));

    let opts = CachedExtractOptions::for_tenant("acme").extraction(ExtractionOptions {
        force_ocr: true,
        ..Default::default()
    });
    let result = extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();

    assert_eq!(result.metadata.text_source, TextSource::Ocr);
    assert_eq!(result.text, "OCR text");
    assert_eq!(ocr.calls(), 1);
    // Consulted for embedded metadata only.
    assert_eq!(parser.calls(), 1);
    assert_eq!(result.metadata.title.as_deref(), Some("Fake Ledger"));
}

#[tokio::test]
async fn invalidate_through_the_facade() {
    let parser = FakeParser::new();
    let (_store, extractor) = memory_extractor(parser.clone(), None);
    let opts = CachedExtractOptions::for_tenant("acme");
    let bytes = ledger_text().into_bytes();

    extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();

    assert!(!extractor.invalidate(&bytes, None, "globex").await.unwrap());
    assert!(extractor.invalidate(&bytes, None, "acme").await.unwrap());
    assert!(!extractor.invalidate(&bytes, None, "acme").await.unwrap());

    extractor.extract_cached(&ledger_doc(), &opts).await.unwrap();
    assert_eq!(parser.calls(), 2);
}

#[tokio::test]
async fn empty_documents_are_rejected() {
    let (_store, extractor) = memory_extractor(FakeParser::new(), None);
    let doc = DocumentInput::from_bytes("empty.pdf", Vec::new());
    let err = extractor
        .extract_cached(&doc, &CachedExtractOptions::for_tenant("acme"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::EmptyInput { .. }));
}
