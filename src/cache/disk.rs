//! Durable cache store: one JSON file per entry.
//!
//! ```text
//! <root>/<tenant-dir>/<fingerprint>.json
//! ```
//!
//! A tenant id made only of `[A-Za-z0-9._-]` (and not `.` or `..`) is used
//! as its directory name verbatim; any other id maps to `~` followed by a
//! hash of the id. `~` never appears in a verbatim name, so the two forms
//! cannot collide and no tenant id can name a path outside its directory.
//!
//! Writes go to a temporary file in the tenant directory and are renamed
//! into place, so readers see either the old entry or the new one.

use super::{validate_tenant, CacheCounters, CacheEntry, CacheStats, CacheStore};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::output::ExtractionResult;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const ENTRY_EXTENSION: &str = "json";

/// Hex digits of the hash kept in a mapped directory name.
const HASHED_NAME_LEN: usize = 32;

/// [`CacheStore`] persisting entries as JSON files.
#[derive(Debug)]
pub struct DiskCacheStore {
    root: PathBuf,
    counters: CacheCounters,
}

impl DiskCacheStore {
    /// A store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: CacheCounters::default(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.directory.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        self.root.join(tenant_dir_name(tenant_id))
    }

    fn entry_path(&self, fingerprint: &Fingerprint, tenant_id: &str) -> PathBuf {
        self.tenant_dir(tenant_id)
            .join(format!("{}.{}", entry_file_stem(fingerprint), ENTRY_EXTENSION))
    }

    /// Read and decode one entry file. `None` if it does not exist.
    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path, e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| CacheError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Remove a file; `false` if it was already gone.
    async fn remove_file(path: &Path) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Entry files in `dir`; empty if the directory does not exist.
    async fn entry_files(dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(io_error(dir, e)),
        };
        while let Some(item) = read_dir.next_entry().await.map_err(|e| io_error(dir, e))? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Every tenant directory under the root.
    async fn tenant_dirs(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut dirs = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(io_error(&self.root, e)),
        };
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let is_dir = item
                .file_type()
                .await
                .map_err(|e| io_error(&item.path(), e))?
                .is_dir();
            if is_dir {
                dirs.push(item.path());
            }
        }
        Ok(dirs)
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn get(
        &self,
        fingerprint: &Fingerprint,
        tenant_id: &str,
    ) -> Result<Option<CacheEntry>, CacheError> {
        validate_tenant(tenant_id)?;
        let path = self.entry_path(fingerprint, tenant_id);

        match Self::read_entry(&path).await? {
            Some(entry) if entry.tenant_id != tenant_id => {
                warn!("{} belongs to another tenant; ignoring", path.display());
                Ok(None)
            }
            Some(entry) if entry.is_expired() => {
                debug!("Dropping expired entry {}", path.display());
                Self::remove_file(&path).await?;
                Ok(None)
            }
            other => Ok(other),
        }
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
        let json = serde_json::to_vec(&entry)?;
        let dir = self.tenant_dir(tenant_id);
        let path = self.entry_path(fingerprint, tenant_id);

        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &json))
            .await
            .map_err(|e| io_error(&self.root, io::Error::other(format!("write task failed: {e}"))))?
    }

    async fn invalidate(
        &self,
        fingerprint: &Fingerprint,
        tenant_id: &str,
    ) -> Result<bool, CacheError> {
        validate_tenant(tenant_id)?;
        let path = self.entry_path(fingerprint, tenant_id);

        let live = match Self::read_entry(&path).await {
            Ok(Some(entry)) => !entry.is_expired(),
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!("Invalidating unreadable entry: {}", e);
                true
            }
        };
        let removed = Self::remove_file(&path).await?;
        Ok(removed && live)
    }

    async fn stats(&self, tenant_id: Option<&str>) -> Result<CacheStats, CacheError> {
        let total = match tenant_id {
            Some(id) => Self::entry_files(&self.tenant_dir(id)).await?.len(),
            None => {
                let mut total = 0;
                for dir in self.tenant_dirs().await? {
                    total += Self::entry_files(&dir).await?.len();
                }
                total
            }
        };
        let (hits, misses) = self.counters.snapshot(tenant_id);
        Ok(CacheStats::new(
            total,
            hits,
            misses,
            self.root.display().to_string(),
        ))
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut removed = 0;
        for dir in self.tenant_dirs().await? {
            for path in Self::entry_files(&dir).await? {
                match Self::read_entry(&path).await {
                    Ok(Some(entry)) if entry.is_expired_at(now) => {
                        if Self::remove_file(&path).await? {
                            removed += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping unreadable cache entry: {}", e),
                }
            }
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        for dir in self.tenant_dirs().await? {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&dir, e)),
            }
        }
        self.counters.reset();
        Ok(())
    }

    fn counters(&self) -> &CacheCounters {
        &self.counters
    }
}

fn io_error(path: &Path, source: io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
    tmp.write_all(bytes).map_err(|e| io_error(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}

fn is_plain_name(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn hashed_name(s: &str) -> String {
    let digest = hex::encode(Sha256::digest(s.as_bytes()));
    format!("~{}", &digest[..HASHED_NAME_LEN])
}

/// Directory name for a tenant id.
pub(crate) fn tenant_dir_name(tenant_id: &str) -> String {
    if is_plain_name(tenant_id) {
        tenant_id.to_string()
    } else {
        hashed_name(tenant_id)
    }
}

fn entry_file_stem(fingerprint: &Fingerprint) -> String {
    let fp = fingerprint.as_str();
    if !fp.is_empty() && fp.chars().all(|c| c.is_ascii_alphanumeric()) {
        fp.to_string()
    } else {
        hashed_name(fp)
    }
}
