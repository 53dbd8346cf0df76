//! In-process cache store.

use super::{validate_tenant, CacheCounters, CacheEntry, CacheStats, CacheStore};
use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::output::ExtractionResult;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

type Key = (String, Fingerprint);

/// [`CacheStore`] backed by a concurrent map. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<Key, CacheEntry>,
    counters: CacheCounters,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(fingerprint: &Fingerprint, tenant_id: &str) -> Key {
        (tenant_id.to_string(), fingerprint.clone())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        fingerprint: &Fingerprint,
        tenant_id: &str,
    ) -> Result<Option<CacheEntry>, CacheError> {
        validate_tenant(tenant_id)?;
        let key = Self::key(fingerprint, tenant_id);

        let expired = match self.entries.get(&key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value().clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("Dropping expired entry {} for tenant {}", fingerprint, tenant_id);
            self.entries.remove_if(&key, |_, e| e.is_expired());
        }
        Ok(None)
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        tenant_id: &str,
        result: &ExtractionResult,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        validate_tenant(tenant_id)?;
        let entry = CacheEntry::new(fingerprint.clone(), tenant_id, result.clone(), ttl);
        self.entries.insert(Self::key(fingerprint, tenant_id), entry);
        Ok(())
    }

    async fn invalidate(
        &self,
        fingerprint: &Fingerprint,
        tenant_id: &str,
    ) -> Result<bool, CacheError> {
        validate_tenant(tenant_id)?;
        Ok(self
            .entries
            .remove(&Self::key(fingerprint, tenant_id))
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn stats(&self, tenant_id: Option<&str>) -> Result<CacheStats, CacheError> {
        let total = match tenant_id {
            Some(id) => self.entries.iter().filter(|e| e.key().0 == id).count(),
            None => self.entries.len(),
        };
        let (hits, misses) = self.counters.snapshot(tenant_id);
        Ok(CacheStats::new(total, hits, misses, "memory"))
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired_at(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.entries.clear();
        self.counters.reset();
        Ok(())
    }

    fn counters(&self) -> &CacheCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_result;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from_hex(s)
    }

    #[tokio::test]
    async fn put_then_get_returns_equal_result() {
        let store = MemoryCacheStore::new();
        let result = sample_result("Balance sheet");
        store
            .put(&fp("aa"), "acme", &result, Duration::from_secs(60))
            .await
            .unwrap();

        let entry = store.get(&fp("aa"), "acme").await.unwrap().unwrap();
        assert_eq!(entry.result, result);
        assert_eq!(entry.tenant_id, "acme");
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = MemoryCacheStore::new();
        store
            .put(&fp("aa"), "acme", &sample_result("A"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.get(&fp("aa"), "globex").await.unwrap().is_none());
        assert!(!store.invalidate(&fp("aa"), "globex").await.unwrap());
        assert!(store.get(&fp("aa"), "acme").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryCacheStore::new();
        store
            .put(&fp("aa"), "acme", &sample_result("A"), Duration::ZERO)
            .await
            .unwrap();

        assert!(store.get(&fp("aa"), "acme").await.unwrap().is_none());
        assert_eq!(store.stats(None).await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn invalidate_reports_existence() {
        let store = MemoryCacheStore::new();
        store
            .put(&fp("aa"), "acme", &sample_result("A"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.invalidate(&fp("aa"), "acme").await.unwrap());
        assert!(!store.invalidate(&fp("aa"), "acme").await.unwrap());
        assert!(store.get(&fp("aa"), "acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = MemoryCacheStore::new();
        store
            .put(&fp("aa"), "acme", &sample_result("A"), Duration::ZERO)
            .await
            .unwrap();
        store
            .put(&fp("bb"), "acme", &sample_result("B"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.stats(Some("acme")).await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn flush_clears_entries_and_counters() {
        let store = MemoryCacheStore::new();
        store
            .put(&fp("aa"), "acme", &sample_result("A"), Duration::from_secs(60))
            .await
            .unwrap();
        store.record_hit("acme");
        store.record_miss("acme");

        let stats = store.stats(Some("acme")).await.unwrap();
        assert_eq!((stats.cache_hits, stats.cache_misses), (1, 1));
        assert_eq!(stats.hit_rate, 0.5);

        store.flush().await.unwrap();
        let stats = store.stats(None).await.unwrap();
        assert_eq!(stats.total_entries, 0);
        assert_eq!((stats.cache_hits, stats.cache_misses), (0, 0));
    }

    #[tokio::test]
    async fn empty_tenant_rejected() {
        let store = MemoryCacheStore::new();
        let err = store.get(&fp("aa"), "").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidTenant(_)));
    }
}
