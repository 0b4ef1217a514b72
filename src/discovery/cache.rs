//! Key-value cache the discovery payload is handed to. Values are opaque JSON.

use crate::model::DiscoveryPayload;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry {key:?} is not valid JSON: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid cache key {key:?}: use letters, digits, '-', '_' or '.'")]
    InvalidKey { key: String },
}

/// Opaque store injected into the aggregator.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Replace the entry for `key` wholesale.
    fn set(&self, key: &str, value: Value) -> Result<(), CacheError>;
}

/// In-process store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// One pretty-printed JSON file per key under a directory. Writes go to a temporary
/// sibling first and are renamed into place, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<user cache dir>/discoscrape`, when the platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("discoscrape"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CacheError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl CacheStore for FileCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let s = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        serde_json::from_str(&s)
            .map(Some)
            .map_err(|source| CacheError::Json {
                key: key.to_string(),
                source,
            })
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let body = serde_json::to_string_pretty(&value).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_error(&path))?;
        Ok(())
    }
}

/// Read a typed payload back from the store.
pub fn load_payload(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<DiscoveryPayload>, CacheError> {
    match cache.get(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| CacheError::Json {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Write a payload, replacing whatever the key held before.
pub fn store_payload(
    cache: &dyn CacheStore,
    key: &str,
    payload: &DiscoveryPayload,
) -> Result<(), CacheError> {
    let value = serde_json::to_value(payload).map_err(|source| CacheError::Json {
        key: key.to_string(),
        source,
    })?;
    cache.set(key, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bucket, Record};
    use chrono::Utc;

    fn payload(titles: &[&str]) -> DiscoveryPayload {
        let mut p = DiscoveryPayload::new(Utc::now());
        let mut latest = Bucket::new("latest");
        for (i, t) in titles.iter().enumerate() {
            latest.records.push(Record {
                title: t.to_string(),
                source_url: format!("https://example.com/series/{}", i),
                cover_url: None,
                status: None,
                rank: None,
            });
        }
        p.insert(latest);
        p
    }

    #[test]
    fn file_cache_round_trips_and_replaces_wholesale() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let cache = FileCache::new(dir.path().join("nested"));
        assert!(load_payload(&cache, "manhwaDiscoveryData")?.is_none());

        let mut first = payload(&["One", "Two"]);
        first.insert(Bucket::new("trending"));
        store_payload(&cache, "manhwaDiscoveryData", &first)?;
        store_payload(&cache, "manhwaDiscoveryData", &payload(&["Three"]))?;

        let back = load_payload(&cache, "manhwaDiscoveryData")?.ok_or("payload missing")?;
        assert_eq!(back.bucket("latest").len(), 1);
        assert!(!back.buckets.contains_key("trending"), "old buckets must not survive");
        assert!(!dir.path().join("nested/manhwaDiscoveryData.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn file_cache_rejects_path_like_keys() {
        let cache = FileCache::new("/tmp/never-used");
        for key in ["", "../etc", "a/b", ".hidden"] {
            assert!(matches!(cache.get(key), Err(CacheError::InvalidKey { .. })), "{key}");
        }
    }

    #[test]
    fn corrupt_file_is_a_json_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("homeData.json"), "{not json")?;
        let cache = FileCache::new(dir.path());
        assert!(matches!(cache.get("homeData"), Err(CacheError::Json { .. })));
        Ok(())
    }

    #[test]
    fn memory_cache_get_set() -> Result<(), CacheError> {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k")?, None);
        cache.set("k", serde_json::json!({"a": 1}))?;
        assert_eq!(cache.get("k")?, Some(serde_json::json!({"a": 1})));
        Ok(())
    }
}
