//! Tenant-isolated storage for extraction results.
//!
//! Entries are keyed by `(tenant, fingerprint)`; the same fingerprint under
//! two tenants is two unrelated entries. Every entry carries an expiry time.
//! Expired entries read as absent and are removed lazily on `get` or in bulk
//! by [`CacheStore::purge_expired`], which [`spawn_reclaimer`] runs
//! periodically.
//!
//! Two stores are provided: [`MemoryCacheStore`] for tests and short-lived
//! processes, and [`DiskCacheStore`], one JSON file per entry under a
//! directory per tenant.
//!
//! Hit and miss counters live in [`CacheCounters`], owned by the store but
//! incremented only by the caller that decides what counts as a hit (the
//! [`crate::CachedExtractor`]). `get` itself has no side effect on stats.

mod disk;
mod memory;

pub use disk::DiskCacheStore;
pub use memory::MemoryCacheStore;

use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::output::ExtractionResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A stored extraction result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub tenant_id: String,
    pub result: ExtractionResult,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// A new entry created now and living for `ttl`.
    pub fn new(
        fingerprint: Fingerprint,
        tenant_id: impl Into<String>,
        result: ExtractionResult,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            fingerprint,
            tenant_id: tenant_id.into(),
            result,
            created_at,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Cache statistics, in the shape dashboards consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Stored entries, including expired ones not yet reclaimed.
    pub total_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
    /// Where entries live: a directory path, or `memory`.
    pub cache_directory: String,
}

impl CacheStats {
    pub fn new(total_entries: usize, hits: u64, misses: u64, location: impl Into<String>) -> Self {
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        Self {
            total_entries,
            cache_hits: hits,
            cache_misses: misses,
            hit_rate,
            cache_directory: location.into(),
        }
    }
}

#[derive(Debug, Default)]
struct HitMiss {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Hit/miss counters, global and per tenant.
///
/// Monotonic until [`CacheCounters::reset`], which only a full flush calls.
#[derive(Debug, Default)]
pub struct CacheCounters {
    global: HitMiss,
    tenants: DashMap<String, Arc<HitMiss>>,
}

impl CacheCounters {
    fn tenant(&self, tenant_id: &str) -> Arc<HitMiss> {
        if let Some(existing) = self.tenants.get(tenant_id) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.tenants.entry(tenant_id.to_string()).or_default().value())
    }

    pub fn record_hit(&self, tenant_id: &str) {
        self.global.hits.fetch_add(1, Ordering::Relaxed);
        self.tenant(tenant_id).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tenant_id: &str) {
        self.global.misses.fetch_add(1, Ordering::Relaxed);
        self.tenant(tenant_id).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// `(hits, misses)` for one tenant, or across all tenants.
    pub fn snapshot(&self, tenant_id: Option<&str>) -> (u64, u64) {
        match tenant_id {
            Some(id) => self
                .tenants
                .get(id)
                .map(|c| {
                    (
                        c.hits.load(Ordering::Relaxed),
                        c.misses.load(Ordering::Relaxed),
                    )
                })
                .unwrap_or((0, 0)),
            None => (
                self.global.hits.load(Ordering::Relaxed),
                self.global.misses.load(Ordering::Relaxed),
            ),
        }
    }

    pub fn reset(&self) {
        self.global.hits.store(0, Ordering::Relaxed);
        self.global.misses.store(0, Ordering::Relaxed);
        self.tenants.clear();
    }
}

/// Storage for extraction results, namespaced by tenant.
///
/// Operations on different keys are independent; implementations serialise
/// writes to the same key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// The live entry for `(fingerprint, tenant_id)`, if any.
    async fn get(
        &self,
        fingerprint: &Fingerprint,
        tenant_id: &str,
    ) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `result`, replacing any existing entry for the key.
    async fn put(
        &self,
        fingerprint: &Fingerprint,
        tenant_id: &str,
        result: &ExtractionResult,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Remove an entry. `true` iff a live entry existed.
    async fn invalidate(&self, fingerprint: &Fingerprint, tenant_id: &str)
        -> Result<bool, CacheError>;

    /// Statistics for one tenant, or for the whole store.
    async fn stats(&self, tenant_id: Option<&str>) -> Result<CacheStats, CacheError>;

    /// Remove every expired entry; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, CacheError>;

    /// Remove every entry and reset the counters.
    async fn flush(&self) -> Result<(), CacheError>;

    fn counters(&self) -> &CacheCounters;

    fn record_hit(&self, tenant_id: &str) {
        self.counters().record_hit(tenant_id);
    }

    fn record_miss(&self, tenant_id: &str) {
        self.counters().record_miss(tenant_id);
    }
}

/// Reject tenant ids no store can namespace.
pub(crate) fn validate_tenant(tenant_id: &str) -> Result<(), CacheError> {
    if tenant_id.trim().is_empty() {
        return Err(CacheError::InvalidTenant("tenant id is empty".into()));
    }
    Ok(())
}

/// Periodically purge expired entries from `store`.
///
/// The first purge runs one `interval` after the call. Abort the returned
/// handle to stop.
pub fn spawn_reclaimer(store: Arc<dyn CacheStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(n) => debug!("Reclaimed {} expired cache entries", n),
                Err(e) => warn!("Cache reclamation failed: {}", e),
            }
        }
    })
}
