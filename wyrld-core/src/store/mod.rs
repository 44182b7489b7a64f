//! Storage adapter boundary.
//!
//! The core talks to two narrow interfaces and nothing else: a key-value
//! store ([`KvStore`]) for live session state, and a blob store
//! ([`BlobStore`]) for whole-session snapshots. Both are assumed-reliable
//! external services; retry/backoff is the adapter's concern, and any
//! failure that leaks through surfaces as
//! [`WorldError::StorageUnavailable`](crate::WorldError::StorageUnavailable).
//!
//! Provided implementations: [`MemoryKvStore`] (tests, ephemeral runs),
//! [`SqliteKvStore`](sqlite::SqliteKvStore) (single-host deployments), and
//! [`LocalBlobStore`] (filesystem snapshots).

pub mod sqlite;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::WorldError;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Narrow key-value interface over session state storage.
///
/// Values are JSON strings; key namespacing (session prefix) is the
/// caller's responsibility. TTL/expiry is a store-level configuration,
/// not enforced here.
pub trait KvStore: Send + Sync {
    /// Fetch the value at `key`, if present.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set the value at `key`, overwriting.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Fetch one field of the hash at `key`.
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Set one field of the hash at `key`.
    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Append a value to the list at `key`.
    fn list_append(&self, key: &str, value: &str) -> Result<()>;

    /// Fetch the whole list at `key` (empty when absent).
    fn list_all(&self, key: &str) -> Result<Vec<String>>;

    /// Whether `key` exists in any shape.
    fn exists(&self, key: &str) -> Result<bool>;
}

/// Narrow blob interface for session snapshots.
pub trait BlobStore: Send + Sync {
    /// Store a JSON document at `path`, overwriting.
    fn put_object(&self, path: &str, data: &Value) -> Result<()>;

    /// Fetch the JSON document at `path`, if present.
    fn get_object(&self, path: &str) -> Result<Option<Value>>;

    /// Delete the document at `path`. Returns whether anything was removed.
    fn delete_object(&self, path: &str) -> Result<bool>;

    /// List document paths under `prefix`.
    fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// In-memory key-value store
// ---------------------------------------------------------------------------

/// Process-local [`KvStore`]. Used by tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    values: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .hashes
            .read()
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn list_append(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .write()
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    fn list_all(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.lists.read().get(key).cloned().unwrap_or_default())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.values.read().contains_key(key)
            || self.hashes.read().contains_key(key)
            || self.lists.read().contains_key(key))
    }
}

// ---------------------------------------------------------------------------
// Local filesystem blob store
// ---------------------------------------------------------------------------

/// Filesystem-backed [`BlobStore`]: one JSON file per object path.
#[derive(Debug)]
pub struct LocalBlobStore {
    base: PathBuf,
}

impl LocalBlobStore {
    /// Open (creating if needed) a blob store rooted at `base`.
    ///
    /// # Errors
    /// Returns an I/O error if the directory cannot be created.
    pub fn open(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        debug!(base = %base.display(), "local blob store opened");
        Ok(Self { base })
    }

    fn full_path(&self, object: &str) -> Result<PathBuf> {
        if object.split('/').any(|part| part == "..") {
            return Err(WorldError::Config(format!(
                "blob path escapes store root: '{object}'"
            )));
        }
        Ok(self.base.join(object))
    }
}

impl BlobStore for LocalBlobStore {
    fn put_object(&self, path: &str, data: &Value) -> Result<()> {
        let full = self.full_path(path)?;
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        fs::write(&full, json)?;
        Ok(())
    }

    fn get_object(&self, path: &str) -> Result<Option<Value>> {
        let full = self.full_path(path)?;
        if !full.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&full)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn delete_object(&self, path: &str) -> Result<bool> {
        let full = self.full_path(path)?;
        if !full.exists() {
            return Ok(false);
        }
        fs::remove_file(&full)?;
        Ok(true)
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut results = Vec::new();
        let mut stack = vec![self.base.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.base) {
                    let rel = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                    if rel.starts_with(prefix) {
                        results.push(rel);
                    }
                }
            }
        }
        results.sort();
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_kv_roundtrip() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("missing").expect("get"), None);

        store.set("k", "v").expect("set");
        assert_eq!(store.get("k").expect("get"), Some("v".to_string()));
        assert!(store.exists("k").expect("exists"));

        store.hash_set("h", "f1", "a").expect("hset");
        store.hash_set("h", "f2", "b").expect("hset");
        assert_eq!(store.hash_get("h", "f1").expect("hget"), Some("a".into()));
        assert_eq!(store.hash_get("h", "nope").expect("hget"), None);

        store.list_append("l", "one").expect("append");
        store.list_append("l", "two").expect("append");
        assert_eq!(store.list_all("l").expect("list"), vec!["one", "two"]);
    }

    #[test]
    fn blob_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = LocalBlobStore::open(dir.path()).expect("open");

        let doc = json!({"schema_version": 1, "name": "session"});
        blobs.put_object("saves/s1.json", &doc).expect("put");
        let loaded = blobs.get_object("saves/s1.json").expect("get");
        assert_eq!(loaded, Some(doc));

        assert_eq!(
            blobs.list_objects("saves/").expect("list"),
            vec!["saves/s1.json"]
        );
        assert!(blobs.delete_object("saves/s1.json").expect("delete"));
        assert!(!blobs.delete_object("saves/s1.json").expect("delete"));
        assert_eq!(blobs.get_object("saves/s1.json").expect("get"), None);
    }

    #[test]
    fn blob_store_rejects_escape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = LocalBlobStore::open(dir.path()).expect("open");
        assert!(blobs.put_object("../evil.json", &json!({})).is_err());
    }
}
