//! TTL cache with a JSON snapshot on disk
//!
//! `TtlCache` maps string keys to whole values plus the time they were stored.
//! Expiry is checked when a key is read; nothing sweeps the table in the
//! background. Every mutation rewrites the snapshot file while the write lock
//! is still held, so the file never lags behind or races the in-memory table.
//! The snapshot is read once, when the cache is opened.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use super::clock::{Clock, SystemClock};
use crate::log::Logger;
use crate::{log_debug, log_info, log_warn};

/// Version written into every snapshot; other versions load as an empty table
pub const SNAPSHOT_VERSION: u32 = 1;

/// A cached value and the moment it was stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
}

/// Errors reading or writing the snapshot file
///
/// These never escape the cache: a failed write is logged and the in-memory
/// table stays authoritative.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache snapshot could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SnapshotRef<'a, V> {
    version: u32,
    entries: &'a HashMap<String, CacheEntry<V>>,
}

#[derive(Deserialize)]
struct Snapshot<V> {
    version: u32,
    entries: HashMap<String, CacheEntry<V>>,
}

/// Thread-safe key/value cache with expiry-on-read and disk persistence
///
/// All access goes through one reader/writer lock over the whole table:
/// lookups share it, `set` and expiry eviction take it exclusively.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    persist_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Opens a cache persisted at `path`, loading whatever snapshot is there.
    ///
    /// A missing, unreadable or corrupt file yields an empty cache.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration, logger: Arc<dyn Logger>) -> Self {
        let path = path.into();
        let entries = load_snapshot(&path, logger.as_ref());
        log_info!(
            logger,
            "Cache initialized path={} ttl={:?} items={}",
            path.display(),
            ttl,
            entries.len()
        );
        Self {
            entries: RwLock::new(entries),
            ttl,
            persist_path: Some(path),
            clock: Arc::new(SystemClock),
            logger,
        }
    }

    /// Creates a cache that never touches the disk
    pub fn in_memory(ttl: Duration, logger: Arc<dyn Logger>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            persist_path: None,
            clock: Arc::new(SystemClock),
            logger,
        }
    }

    /// Replaces the time source used for `stored_at` and expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Returns the value for `key` if it is present and younger than the TTL.
    ///
    /// An expired entry is removed (and the snapshot rewritten) before `None`
    /// is returned.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Like [`get`](Self::get) but also returns when the value was stored
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => {
                    log_debug!(self.logger, "Cache miss key={}", key);
                    return None;
                }
                Some(entry) if self.is_fresh(entry, now) => {
                    log_debug!(self.logger, "Cache hit key={}", key);
                    return Some(entry.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // A set may have landed between dropping the read lock and taking this one
        if let Some(entry) = entries.get(key) {
            if self.is_fresh(entry, now) {
                log_debug!(self.logger, "Cache hit key={}", key);
                return Some(entry.clone());
            }
        }
        if let Some(expired) = entries.remove(key) {
            log_info!(
                self.logger,
                "Cache expired key={} age={}s",
                key,
                (now - expired.stored_at).num_seconds()
            );
            self.persist(&entries);
        }
        None
    }

    /// Stores `value` under `key` with `stored_at = now`, then rewrites the snapshot.
    ///
    /// A persistence failure is logged and otherwise ignored.
    pub fn set(&self, key: &str, value: V) {
        let mut entries = self.entries.write();

        let mut stored_at = self.clock.now();
        if let Some(previous) = entries.get(key) {
            // last write wins, and its timestamp never moves backwards
            stored_at = stored_at.max(previous.stored_at);
        }
        entries.insert(key.to_string(), CacheEntry { value, stored_at });
        self.persist(&entries);

        log_info!(self.logger, "Cache updated key={} total_items={}", key, entries.len());
    }

    /// Number of entries currently held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of the raw table, without expiry filtering
    pub fn snapshot(&self) -> HashMap<String, CacheEntry<V>> {
        self.entries.read().clone()
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        match (now - entry.stored_at).to_std() {
            Ok(age) => age < self.ttl,
            // stored "in the future" relative to this clock
            Err(_) => true,
        }
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry<V>>) {
        let Some(path) = &self.persist_path else {
            return;
        };
        match write_snapshot(path, entries) {
            Ok(()) => log_debug!(self.logger, "Cache saved to disk path={}", path.display()),
            Err(e) => log_warn!(self.logger, "Failed to save cache: {}", e),
        }
    }
}

fn load_snapshot<V: DeserializeOwned>(
    path: &Path,
    logger: &dyn Logger,
) -> HashMap<String, CacheEntry<V>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            log_debug!(logger, "No existing cache file, starting empty path={}", path.display());
            return HashMap::new();
        }
    };

    match serde_json::from_str::<Snapshot<V>>(&content) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
            log_info!(
                logger,
                "Cache loaded from disk items={} path={}",
                snapshot.entries.len(),
                path.display()
            );
            snapshot.entries
        }
        Ok(snapshot) => {
            log_warn!(
                logger,
                "Ignoring cache snapshot with version {} (expected {})",
                snapshot.version,
                SNAPSHOT_VERSION
            );
            HashMap::new()
        }
        Err(e) => {
            log_warn!(logger, "Failed to decode cache, starting empty: {}", e);
            HashMap::new()
        }
    }
}

/// Writes the snapshot to a sibling temp file and renames it over `path`
fn write_snapshot<V: Serialize>(
    path: &Path,
    entries: &HashMap<String, CacheEntry<V>>,
) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(&SnapshotRef {
        version: SNAPSHOT_VERSION,
        entries,
    })?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
