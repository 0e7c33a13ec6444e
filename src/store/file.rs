//! JSON-file backed [`StringSetStore`] implementation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::error;

use super::StringSetStore;

/// Errors opening the backing document.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or creating the document failed.
    #[error("IO error opening store {path}: {source}")]
    Io {
        /// The document path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The document exists but is not valid JSON for this store.
    #[error("malformed store document {path}: {source}")]
    Malformed {
        /// The document path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk shape of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    sets: HashMap<String, Vec<String>>,
    #[serde(default)]
    millis: HashMap<String, i64>,
}

/// Store persisted as a single JSON document.
///
/// Every write rewrites the whole document via a temp-file rename, so a
/// crash mid-write never leaves a truncated store behind. Write failures
/// are logged rather than surfaced; readers keep the in-memory value.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    sets: Mutex<HashMap<String, watch::Sender<HashSet<String>>>>,
    millis: Mutex<HashMap<String, i64>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading the existing document if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the document cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let document = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice::<Document>(&raw).map_err(|source| {
                StoreError::Malformed {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };

        let sets = document
            .sets
            .into_iter()
            .map(|(key, values)| {
                let set: HashSet<String> = values.into_iter().collect();
                (key, watch::channel(set).0)
            })
            .collect();

        Ok(Self {
            path,
            sets: Mutex::new(sets),
            millis: Mutex::new(document.millis),
        })
    }

    fn with_sender<T>(&self, key: &str, action: impl FnOnce(&watch::Sender<HashSet<String>>) -> T) -> T {
        let mut sets = self.sets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let sender = sets
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(HashSet::new()).0);
        action(sender)
    }

    /// Serializes the current state back to disk, temp-file then rename.
    fn persist(&self) {
        let document = {
            let sets = self.sets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let millis = self.millis.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Document {
                sets: sets
                    .iter()
                    .map(|(key, sender)| {
                        let mut values: Vec<String> = sender.borrow().iter().cloned().collect();
                        values.sort_unstable();
                        (key.clone(), values)
                    })
                    .collect(),
                millis: millis.clone(),
            }
        };

        if let Err(error) = write_document(&self.path, &document) {
            error!(path = %self.path.display(), %error, "failed to persist store document");
        }
    }
}

fn write_document(path: &Path, document: &Document) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_vec_pretty(document)?;
    let temp = path.with_extension("json.tmp");
    std::fs::write(&temp, raw)?;
    std::fs::rename(&temp, path)
}

impl StringSetStore for JsonFileStore {
    fn get(&self, key: &str) -> HashSet<String> {
        self.with_sender(key, |sender| sender.borrow().clone())
    }

    fn put(&self, key: &str, values: HashSet<String>) {
        self.with_sender(key, |sender| {
            sender.send_replace(values);
        });
        self.persist();
    }

    fn watch(&self, key: &str) -> watch::Receiver<HashSet<String>> {
        self.with_sender(key, watch::Sender::subscribe)
    }

    fn get_millis(&self, key: &str) -> i64 {
        let millis = self.millis.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        millis.get(key).copied().unwrap_or(0)
    }

    fn put_millis(&self, key: &str, value: i64) {
        {
            let mut millis = self.millis.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            millis.insert(key.to_string(), value);
        }
        self.persist();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_json_file_store_starts_empty_without_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();
        assert!(store.get("pending").is_empty());
        assert_eq!(store.get_millis("cooldown"), 0);
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let values: HashSet<String> = ["1_a;;b".to_string(), "2_c;;d".to_string()].into();
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.put("pending", values.clone());
            store.put_millis("cooldown", 123_456);
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("pending"), values);
        assert_eq!(reopened.get_millis("cooldown"), 123_456);
    }

    #[test]
    fn test_json_file_store_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/state.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.put("key", ["value".to_string()].into());

        assert!(path.exists());
    }

    #[test]
    fn test_json_file_store_rejects_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let error = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(error, StoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_json_file_store_put_notifies_watchers() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();

        let mut receiver = store.watch("pending");
        store.put("pending", ["1_x".to_string()].into());

        receiver.changed().await.unwrap();
        assert!(receiver.borrow().contains("1_x"));
    }
}
