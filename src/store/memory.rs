//! In-memory [`StringSetStore`] implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::watch;

use super::StringSetStore;

/// Volatile store backed by watch channels, one per key.
///
/// Used by tests and anywhere persistence across restarts is not needed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, watch::Sender<HashSet<String>>>>,
    millis: Mutex<HashMap<String, i64>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sender<T>(&self, key: &str, action: impl FnOnce(&watch::Sender<HashSet<String>>) -> T) -> T {
        let mut sets = self.sets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let sender = sets
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(HashSet::new()).0);
        action(sender)
    }
}

impl StringSetStore for MemoryStore {
    fn get(&self, key: &str) -> HashSet<String> {
        self.with_sender(key, |sender| sender.borrow().clone())
    }

    fn put(&self, key: &str, values: HashSet<String>) {
        self.with_sender(key, |sender| {
            sender.send_replace(values);
        });
    }

    fn watch(&self, key: &str) -> watch::Receiver<HashSet<String>> {
        self.with_sender(key, watch::Sender::subscribe)
    }

    fn get_millis(&self, key: &str) -> i64 {
        let millis = self.millis.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        millis.get(key).copied().unwrap_or(0)
    }

    fn put_millis(&self, key: &str, value: i64) {
        let mut millis = self.millis.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        millis.insert(key.to_string(), value);
    }
}
