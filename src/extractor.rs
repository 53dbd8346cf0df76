//! The cached extraction façade.
//!
//! [`CachedExtractor`] puts a [`CacheStore`] in front of an
//! [`ExtractionPipeline`]. For one `(tenant, fingerprint)` key the pipeline
//! runs at most once per cache validity window: concurrent misses for the
//! same key queue on a per-key lock and re-check the cache once they hold
//! it, so only the first caller computes.
//!
//! Cache failures never cost the caller a result: a failed read counts as a
//! miss and a failed write is logged and ignored.

use crate::cache::{CacheStats, CacheStore};
use crate::config::{CacheConfig, CachedExtractOptions, DEFAULT_TTL_SECS};
use crate::error::ExtractError;
use crate::fingerprint::{fingerprint, Fingerprint, FingerprintContext};
use crate::output::ExtractionResult;
use crate::pipeline::{DocumentInput, ExtractionPipeline};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type InflightKey = (String, Fingerprint);

/// Extraction with tenant-scoped memoisation.
pub struct CachedExtractor {
    pipeline: Arc<ExtractionPipeline>,
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    inflight: DashMap<InflightKey, Arc<Mutex<()>>>,
}

impl CachedExtractor {
    pub fn new(pipeline: Arc<ExtractionPipeline>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            pipeline,
            store,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            inflight: DashMap::new(),
        }
    }

    /// Take the default TTL from `config`.
    pub fn with_cache_config(mut self, config: &CacheConfig) -> Self {
        self.default_ttl = config.default_ttl();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Arc<ExtractionPipeline> {
        &self.pipeline
    }

    /// Extract `input`, serving from the tenant's cache when possible.
    ///
    /// # Errors
    /// [`ExtractError::InvalidConfig`] for a blank tenant id,
    /// [`ExtractError::EmptyInput`] for an empty document, and fatal pipeline
    /// errors. Cache errors are never returned.
    pub async fn extract_cached(
        &self,
        input: &DocumentInput,
        options: &CachedExtractOptions,
    ) -> Result<ExtractionResult, ExtractError> {
        let tenant = options.tenant_id.as_str();
        require_tenant(tenant)?;
        if input.bytes.is_empty() {
            return Err(ExtractError::EmptyInput {
                filename: input.filename.clone(),
            });
        }
        let fp = fingerprint(&input.bytes, options.context.as_ref())?;

        if !options.force_refresh {
            if let Some(result) = self.lookup(&fp, tenant).await {
                self.store.record_hit(tenant);
                debug!("{}: cache hit for tenant {}", input.filename, tenant);
                return Ok(result);
            }
        }

        let lock = self.key_lock(&fp, tenant);
        let outcome = {
            let _guard = lock.lock().await;
            self.compute(input, options, &fp, tenant).await
        };
        drop(lock);
        self.release_key_lock(&fp, tenant);
        outcome
    }

    /// Drop the cached entry for `bytes` under `context` for `tenant_id`.
    ///
    /// Returns `true` iff an entry existed. A failing store reads as `false`.
    pub async fn invalidate(
        &self,
        bytes: &[u8],
        context: Option<&FingerprintContext>,
        tenant_id: &str,
    ) -> Result<bool, ExtractError> {
        require_tenant(tenant_id)?;
        let fp = fingerprint(bytes, context)?;
        match self.store.invalidate(&fp, tenant_id).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                warn!("Cache invalidation failed for tenant {}: {}", tenant_id, e);
                Ok(false)
            }
        }
    }

    /// Cache statistics for one tenant, or for the whole store.
    pub async fn stats(&self, tenant_id: Option<&str>) -> Result<CacheStats, ExtractError> {
        self.store
            .stats(tenant_id)
            .await
            .map_err(|e| ExtractError::Internal(format!("cache stats unavailable: {}", e)))
    }

    /// Work done while holding the key lock.
    async fn compute(
        &self,
        input: &DocumentInput,
        options: &CachedExtractOptions,
        fp: &Fingerprint,
        tenant: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        // A caller that queued behind another computation finds its result here.
        if !options.force_refresh {
            if let Some(result) = self.lookup(fp, tenant).await {
                self.store.record_hit(tenant);
                debug!("{}: filled while waiting, tenant {}", input.filename, tenant);
                return Ok(result);
            }
        }

        self.store.record_miss(tenant);
        debug!(
            "{}: cache {} for tenant {}; running pipeline",
            input.filename,
            if options.force_refresh { "bypass" } else { "miss" },
            tenant
        );

        let result = self.pipeline.extract(input, &options.extraction).await?;

        let ttl = options
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);
        if let Err(e) = self.store.put(fp, tenant, &result, ttl).await {
            warn!("{}: result not cached: {}", input.filename, e);
        }
        Ok(result)
    }

    /// Cache read where any store error is a miss.
    async fn lookup(&self, fp: &Fingerprint, tenant: &str) -> Option<ExtractionResult> {
        match self.store.get(fp, tenant).await {
            Ok(entry) => entry.map(|e| e.result),
            Err(e) => {
                warn!("Cache read failed for tenant {}; treating as miss: {}", tenant, e);
                None
            }
        }
    }

    fn key_lock(&self, fp: &Fingerprint, tenant: &str) -> Arc<Mutex<()>> {
        let key = (tenant.to_string(), fp.clone());
        Arc::clone(self.inflight.entry(key).or_default().value())
    }

    /// Forget the lock for a key once no other caller holds a handle to it.
    fn release_key_lock(&self, fp: &Fingerprint, tenant: &str) {
        let key = (tenant.to_string(), fp.clone());
        self.inflight
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn require_tenant(tenant_id: &str) -> Result<(), ExtractError> {
    if tenant_id.trim().is_empty() {
        return Err(ExtractError::InvalidConfig("tenant id is empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::StageError;
    use crate::pipeline::{ParsedText, TextParser};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingParser {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextParser for CountingParser {
        fn name(&self) -> &str {
            "counting"
        }

        async fn parse_text(&self, bytes: &[u8]) -> Result<ParsedText, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ParsedText {
                text: String::from_utf8_lossy(bytes).into_owned(),
                page_count: 1,
                ..Default::default()
            })
        }
    }

    fn extractor() -> (Arc<CountingParser>, Arc<MemoryCacheStore>, CachedExtractor) {
        let parser = Arc::new(CountingParser {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryCacheStore::new());
        let pipeline = ExtractionPipeline::builder().parser(parser.clone()).build();
        let extractor = CachedExtractor::new(Arc::new(pipeline), store.clone());
        (parser, store, extractor)
    }

    #[tokio::test]
    async fn second_call_is_a_hit() {
        let (parser, store, ex) = extractor();
        let doc = DocumentInput::from_bytes("a.pdf", b"Ledger for March".to_vec());
        let opts = CachedExtractOptions::for_tenant("acme");

        let first = ex.extract_cached(&doc, &opts).await.unwrap();
        let second = ex.extract_cached(&doc, &opts).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        let stats = store.stats(Some("acme")).await.unwrap();
        assert_eq!((stats.cache_hits, stats.cache_misses), (1, 1));
    }

    #[tokio::test]
    async fn key_locks_are_released() {
        let (_parser, _store, ex) = extractor();
        let doc = DocumentInput::from_bytes("a.pdf", b"Ledger".to_vec());
        ex.extract_cached(&doc, &CachedExtractOptions::for_tenant("acme"))
            .await
            .unwrap();
        assert!(ex.inflight.is_empty());
    }

    #[tokio::test]
    async fn empty_input_names_the_file() {
        let (_parser, _store, ex) = extractor();
        let doc = DocumentInput::from_bytes("blank.pdf", Vec::new());
        let err = ex
            .extract_cached(&doc, &CachedExtractOptions::for_tenant("acme"))
            .await
            .unwrap_err();
        match err {
            ExtractError::EmptyInput { filename } => assert_eq!(filename, "blank.pdf"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_tenant_rejected_before_extraction() {
        let (parser, store, ex) = extractor();
        let doc = DocumentInput::from_bytes("a.pdf", b"Ledger".to_vec());

        for tenant in ["", "   "] {
            let err = ex
                .extract_cached(&doc, &CachedExtractOptions::for_tenant(tenant))
                .await
                .unwrap_err();
            assert!(matches!(err, ExtractError::InvalidConfig(_)), "{err:?}");
            assert!(ex.invalidate(b"Ledger", None, tenant).await.is_err());
        }

        assert_eq!(parser.calls.load(Ordering::SeqCst), 0);
        let stats = store.stats(None).await.unwrap();
        assert_eq!((stats.cache_hits, stats.cache_misses), (0, 0));
    }
}
