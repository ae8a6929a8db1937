// TTL cache with swappable storage backends

use crate::error::{Result, ScanError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Default lifetime for geolocation and block-list entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub stored_at: DateTime<Utc>,
    pub value: serde_json::Value,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            stored_at: Utc::now(),
            value,
        }
    }

    pub fn age(&self) -> ChronoDuration {
        Utc::now() - self.stored_at
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        match ChronoDuration::from_std(ttl) {
            Ok(ttl) => self.age() < ttl,
            Err(_) => true,
        }
    }
}

/// Storage backend for cache entries. Writes are idempotent upserts;
/// concurrent writers for the same key may race, last writer wins.
pub trait CacheStore: Send + Sync {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;
    fn store(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()>;
}

/// One JSON file per entry under `<root>/<namespace>/<key>.json`.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join(format!("{}.json", sanitize_key(key)))
    }
}

impl CacheStore for DiskStore {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(namespace, key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // A torn write from a concurrent process reads as a miss.
                warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn store(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
        let path = self.entry_path(namespace, key);
        if let Some(dir) = path.parent() {
            // create_dir_all succeeds when another worker created it first
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension(format!(
            "json.{}-{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, serde_json::to_vec(entry)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-process store, mainly for tests and cache-less runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ScanError::CacheError(e.to_string()))?;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn store(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ScanError::CacheError(e.to_string()))?;
        entries.insert((namespace.to_string(), key.to_string()), entry.clone());
        Ok(())
    }
}

/// Typed view over a store: one namespace, one TTL.
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn CacheStore>,
    namespace: String,
    ttl: Duration,
}

impl TtlCache {
    pub fn new(store: Arc<dyn CacheStore>, namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl,
        }
    }

    /// Fresh entry only.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<(T, DateTime<Utc>)> {
        self.lookup(key, true)
    }

    /// Entry of any age, for degraded fallback after a failed refresh.
    pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<(T, DateTime<Utc>)> {
        self.lookup(key, false)
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_value(value)
            .map_err(ScanError::from)
            .and_then(|value| {
                self.store
                    .store(&self.namespace, key, &CacheEntry::new(value))
            });
        if let Err(e) = result {
            warn!("Failed to write {} cache entry {}: {}", self.namespace, key, e);
        }
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str, fresh_only: bool) -> Option<(T, DateTime<Utc>)> {
        let entry = match self.store.load(&self.namespace, key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read {} cache entry {}: {}", self.namespace, key, e);
                return None;
            }
        };
        if fresh_only && !entry.is_fresh(self.ttl) {
            debug!("{} cache entry {} expired", self.namespace, key);
            return None;
        }
        serde_json::from_value(entry.value)
            .ok()
            .map(|value| (value, entry.stored_at))
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}
