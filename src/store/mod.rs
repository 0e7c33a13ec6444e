//! Persisted string-set store seam.
//!
//! The pipeline's persisted collections (pending queue, downloaded registry)
//! and the captcha cooldown timestamp live behind [`StringSetStore`], a
//! small key/value contract with change notification. Two implementations
//! are provided: [`MemoryStore`] for tests and in-process use, and
//! [`JsonFileStore`] which survives process restarts by mirroring every
//! write into a JSON document on disk.

mod file;
mod memory;

use std::collections::HashSet;

use tokio::sync::watch;

pub use file::{JsonFileStore, StoreError};
pub use memory::MemoryStore;

/// Persisted key/value store holding string sets and millisecond scalars.
///
/// A `put` must be visible to every active [`watch`](StringSetStore::watch)
/// subscriber without re-polling; late subscribers observe the latest value
/// immediately.
pub trait StringSetStore: Send + Sync {
    /// Returns the set stored under `key`, empty if absent.
    fn get(&self, key: &str) -> HashSet<String>;

    /// Replaces the set stored under `key` and notifies watchers.
    fn put(&self, key: &str, values: HashSet<String>);

    /// Subscribes to changes of the set stored under `key`.
    ///
    /// The receiver starts at the current value; every `put` produces a
    /// change notification even when the value is unchanged, mirroring a
    /// preference-change callback.
    fn watch(&self, key: &str) -> watch::Receiver<HashSet<String>>;

    /// Returns the millisecond scalar stored under `key`, `0` if absent.
    fn get_millis(&self, key: &str) -> i64;

    /// Replaces the millisecond scalar stored under `key`.
    fn put_millis(&self, key: &str, value: i64);
}
