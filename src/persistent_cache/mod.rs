//! Generic file-backed key/value cache.
//!
//! Each [`PersistentCache`] owns one JSON file under the state directory:
//!
//! ```json
//! { "version": 1, "entries": { "<key>": { "value": ..., "updatedAt": "<RFC 3339>" } } }
//! ```
//!
//! - Loading is lazy and shared: the first access reads the file, concurrent
//!   callers await the same load.
//! - Entries older than `max_age` are dropped on read and by a background
//!   pruning task.
//! - `max_entries` is enforced on write by evicting the oldest `updatedAt`.
//! - Writes go to a temp file that is renamed over the target. A failed write
//!   leaves the in-memory state intact, so the cache degrades to memory-only.

mod paths;

#[cfg(test)]
mod tests;

pub use paths::{default_state_dir, ensure_state_dir};

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::OnceCell;

pub const CACHE_FORMAT_VERSION: u32 = 1;
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(300);
pub const MIN_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Values a cache can hold.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheFilePayload<T> {
    pub version: u32,
    pub entries: HashMap<String, CacheEntry<T>>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Entries older than this are treated as missing.
    pub max_age: Option<Duration>,
    /// Upper bound on stored entries; oldest are evicted first.
    pub max_entries: Option<usize>,
    /// Background prune cadence, clamped to [`MIN_PRUNE_INTERVAL`].
    pub prune_interval: Option<Duration>,
    /// Overrides the state directory the file lives in.
    pub directory: Option<PathBuf>,
}

impl CacheOptions {
    pub fn effective_prune_interval(&self) -> Duration {
        self.prune_interval
            .unwrap_or(DEFAULT_PRUNE_INTERVAL)
            .max(MIN_PRUNE_INTERVAL)
    }
}

struct CacheInner<T> {
    name: String,
    /// `None` when the state directory could not be created.
    path: Option<PathBuf>,
    options: CacheOptions,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    loaded: OnceCell<()>,
    write_gate: tokio::sync::Mutex<()>,
}

/// Handle to a shared cache instance. Clones refer to the same entries.
pub struct PersistentCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for PersistentCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for PersistentCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .field("entries", &self.inner.entries.lock().len())
            .finish()
    }
}

impl<T: Cacheable> PersistentCache<T> {
    /// Create a cache backed by `filename` inside the state directory.
    ///
    /// No disk I/O happens beyond creating the directory; entries load on
    /// first access. When called inside a tokio runtime with a TTL set, a
    /// pruning task is started that lives as long as the cache.
    pub fn open(filename: &str, options: CacheOptions) -> Self {
        let path = match ensure_state_dir(options.directory.as_deref()) {
            Ok(dir) => Some(dir.join(filename)),
            Err(e) => {
                tracing::warn!(cache = filename, "state directory unavailable, cache is memory-only: {e}");
                None
            }
        };

        let inner = Arc::new(CacheInner {
            name: filename.to_string(),
            path,
            options,
            entries: Mutex::new(HashMap::new()),
            loaded: OnceCell::new(),
            write_gate: tokio::sync::Mutex::new(()),
        });
        spawn_pruner(&inner);

        Self { inner }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.ensure_loaded().await;

        {
            let mut entries = self.inner.entries.lock();
            let entry = entries.get(key)?;
            if !self.is_expired(entry, Utc::now()) {
                return Some(entry.clone());
            }
            entries.remove(key);
        }

        if let Err(e) = self.persist().await {
            tracing::warn!(cache = %self.inner.name, "failed to persist expiry: {e}");
        }
        None
    }

    pub async fn get_value(&self, key: &str) -> Option<T> {
        self.get(key).await.map(|entry| entry.value)
    }

    /// Store `value` under `key` and persist.
    ///
    /// The in-memory update always succeeds; the returned error only reports
    /// that the disk write failed.
    pub async fn set(&self, key: &str, value: T) -> std::io::Result<()> {
        self.ensure_loaded().await;

        {
            let mut entries = self.inner.entries.lock();
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    updated_at: Utc::now(),
                },
            );
            if let Some(max) = self.inner.options.max_entries {
                let evicted = evict_oldest(&mut entries, max);
                if evicted > 0 {
                    tracing::debug!(cache = %self.inner.name, evicted, "evicted oldest entries");
                }
            }
        }

        self.persist().await
    }

    pub async fn remove(&self, key: &str) -> std::io::Result<bool> {
        self.ensure_loaded().await;
        let removed = self.inner.entries.lock().remove(key).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Snapshot of all stored entries, including ones not yet pruned.
    pub async fn entries_list(&self) -> Vec<(String, CacheEntry<T>)> {
        self.ensure_loaded().await;
        let entries = self.inner.entries.lock();
        let mut list: Vec<_> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub async fn len(&self) -> usize {
        self.ensure_loaded().await;
        self.inner.entries.lock().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every TTL-expired entry, persisting when anything was removed.
    pub async fn prune_expired(&self) -> usize {
        if self.inner.options.max_age.is_none() {
            return 0;
        }
        self.ensure_loaded().await;

        let removed = {
            let now = Utc::now();
            let mut entries = self.inner.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| !self.is_expired(entry, now));
            before - entries.len()
        };

        if removed > 0 {
            tracing::debug!(cache = %self.inner.name, removed, "pruned expired entries");
            if let Err(e) = self.persist().await {
                tracing::warn!(cache = %self.inner.name, "failed to persist prune: {e}");
            }
        }
        removed
    }

    /// Write the current entries to disk via temp file + rename.
    ///
    /// Writes are serialized per instance; the snapshot is taken after the
    /// previous write finished so the file never regresses.
    pub async fn persist(&self) -> std::io::Result<()> {
        let Some(path) = self.inner.path.clone() else {
            return Ok(());
        };

        let _gate = self.inner.write_gate.lock().await;
        let bytes = {
            let entries = self.inner.entries.lock();
            let payload = CacheFilePayload {
                version: CACHE_FORMAT_VERSION,
                entries: entries.clone(),
            };
            simd_json::to_vec(&payload).map_err(std::io::Error::other)?
        };

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(std::io::Error::other)?
    }

    async fn ensure_loaded(&self) {
        self.inner
            .loaded
            .get_or_init(|| async {
                let loaded = match self.inner.path.clone() {
                    Some(path) => load_payload::<T>(&path).await,
                    None => HashMap::new(),
                };
                if !loaded.is_empty() {
                    tracing::debug!(cache = %self.inner.name, entries = loaded.len(), "loaded cache");
                }
                let mut entries = self.inner.entries.lock();
                for (key, entry) in loaded {
                    entries.entry(key).or_insert(entry);
                }
            })
            .await;
    }

    fn is_expired(&self, entry: &CacheEntry<T>, now: DateTime<Utc>) -> bool {
        match self.inner.options.max_age {
            Some(max_age) => {
                let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
                now.signed_duration_since(entry.updated_at) > max_age
            }
            None => false,
        }
    }
}

/// Evict entries with the oldest `updated_at` until at most `max` remain.
fn evict_oldest<T>(entries: &mut HashMap<String, CacheEntry<T>>, max: usize) -> usize {
    if entries.len() <= max {
        return 0;
    }
    let excess = entries.len() - max;
    let mut by_age: Vec<(DateTime<Utc>, String)> = entries
        .iter()
        .map(|(key, entry)| (entry.updated_at, key.clone()))
        .collect();
    by_age.sort();
    for (_, key) in by_age.into_iter().take(excess) {
        entries.remove(&key);
    }
    excess
}

/// Read and validate a cache file. Anything unexpected yields an empty map.
async fn load_payload<T: Cacheable>(path: &Path) -> HashMap<String, CacheEntry<T>> {
    let mut bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to read cache file: {e}");
            return HashMap::new();
        }
    };

    match simd_json::from_slice::<CacheFilePayload<T>>(&mut bytes) {
        Ok(payload) if payload.version == CACHE_FORMAT_VERSION => payload.entries,
        Ok(payload) => {
            tracing::debug!(
                path = %path.display(),
                version = payload.version,
                "ignoring cache file with unexpected version"
            );
            HashMap::new()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring malformed cache file: {e}");
            HashMap::new()
        }
    }
}

/// Each write gets its own uniquely named temp file in the target directory,
/// so handles sharing a file never clobber each other's half-written data.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn spawn_pruner<T: Cacheable>(inner: &Arc<CacheInner<T>>) {
    if inner.options.max_age.is_none() {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };

    let interval = inner.options.effective_prune_interval();
    let weak: Weak<CacheInner<T>> = Arc::downgrade(inner);
    handle.spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            PersistentCache { inner }.prune_expired().await;
        }
    });
}
