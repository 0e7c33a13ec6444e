//! Persisted registry of completed downloads.
//!
//! Records carry three fields (`id`, `url`, `storage_uri`) behind the same
//! ordered encoding the pending queue uses, but the registry lists newest
//! first. Listing also self-heals: entries whose stored file no longer
//! exists are dropped and the pruned set is written back, so a download
//! deleted out from under the app simply disappears from the registry.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::Stream;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::codec::{self, CodecError};
use crate::fs::{FileExistence, StorageError, VideoStorage};
use crate::model::{DownloadedEntry, MaterializedVideo};
use crate::store::StringSetStore;

/// Store key holding the encoded downloaded members.
const DOWNLOADED_KEY: &str = "downloaded_videos";

/// Number of payload fields in a downloaded record (`id`, `url`, `uri`).
const DOWNLOADED_FIELDS: usize = 3;

/// File extension used when the server reported no usable content type.
const DEFAULT_EXTENSION: &str = "mp4";

/// Errors raised by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A persisted record could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A record decoded into the wrong number of fields.
    #[error("registry record {record:?} decoded into {found} fields, expected {DOWNLOADED_FIELDS}")]
    MalformedRecord {
        /// The raw record that failed to decode.
        record: String,
        /// The number of fields actually found.
        found: usize,
    },
}

/// Registry of downloads, backed by the string-set store and a storage
/// collaborator pair.
#[derive(Clone)]
pub struct DownloadedRegistry {
    store: Arc<dyn StringSetStore>,
    storage: Arc<dyn VideoStorage>,
    existence: Arc<dyn FileExistence>,
    media_dir: String,
}

impl DownloadedRegistry {
    /// Creates a registry storing media under `media_dir`.
    #[must_use]
    pub fn new(
        store: Arc<dyn StringSetStore>,
        storage: Arc<dyn VideoStorage>,
        existence: Arc<dyn FileExistence>,
        media_dir: impl Into<String>,
    ) -> Self {
        Self {
            store,
            storage,
            existence,
            media_dir: media_dir.into(),
        }
    }

    /// Returns the registry newest first, pruning entries whose stored file
    /// has disappeared.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when a persisted record is corrupt.
    pub fn list(&self) -> Result<Vec<DownloadedEntry>, RegistryError> {
        let members = self.store.get(DOWNLOADED_KEY);

        let mut rows = members
            .iter()
            .map(|member| decode_row(member))
            .collect::<Result<Vec<_>, _>>()?;
        rows.sort_by_key(|row| std::cmp::Reverse(row.timestamp));

        let before = rows.len();
        let mut kept_members = HashSet::with_capacity(before);
        let mut entries = Vec::with_capacity(before);
        for row in rows {
            if self.existence.exists(&row.entry.storage_uri) {
                kept_members.insert(row.member);
                entries.push(row.entry);
            } else {
                warn!(
                    id = %row.entry.id,
                    uri = %row.entry.storage_uri,
                    "stored file missing, pruning registry entry"
                );
            }
        }

        if entries.len() != before {
            self.store.put(DOWNLOADED_KEY, kept_members);
        }
        Ok(entries)
    }

    /// Writes `video` to storage and records the download.
    ///
    /// The file name is `{id}.{subtype}` with `mp4` as the fallback
    /// extension.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the write fails or produces no URI.
    pub async fn save(&self, video: MaterializedVideo) -> Result<DownloadedEntry, StorageError> {
        let extension = video
            .content_type
            .as_ref()
            .map_or(DEFAULT_EXTENSION, |content_type| content_type.subtype.as_str());
        let file_name = format!("{}.{extension}", video.id);
        let mime_type = video.content_type.as_ref().map(ToString::to_string);

        let storage_uri = self
            .storage
            .store(&self.media_dir, &file_name, mime_type.as_deref(), video.bytes)
            .await?;
        if storage_uri.is_empty() {
            return Err(StorageError::MissingUri);
        }

        let entry = DownloadedEntry {
            id: video.id,
            url: video.url,
            storage_uri,
        };
        let mut members = self.store.get(DOWNLOADED_KEY);
        members.insert(encode_entry(codec::next_timestamp_millis(), &entry));
        self.store.put(DOWNLOADED_KEY, members);

        info!(id = %entry.id, uri = %entry.storage_uri, "download recorded");
        Ok(entry)
    }

    /// Removes `entry` from the registry; a no-op when absent.
    ///
    /// The stored file itself is left in place.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when a persisted record is corrupt.
    pub fn remove(&self, entry: &DownloadedEntry) -> Result<(), RegistryError> {
        let members = self.store.get(DOWNLOADED_KEY);
        let mut kept = HashSet::with_capacity(members.len());
        for member in members {
            let row = decode_row(&member)?;
            if row.entry != *entry {
                kept.insert(member);
            }
        }
        self.store.put(DOWNLOADED_KEY, kept);
        Ok(())
    }

    /// Subscribes to raw change notifications of the underlying store.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<HashSet<String>> {
        self.store.watch(DOWNLOADED_KEY)
    }

    /// Streams the decoded registry: the current value immediately, then
    /// one item per value change. Store rewrites that decode to the last
    /// emitted value are swallowed; corrupt snapshots are logged and
    /// skipped.
    pub fn observe(&self) -> impl Stream<Item = Vec<DownloadedEntry>> + Send + 'static {
        let registry = self.clone();
        let receiver = self.changes();
        futures_util::stream::unfold(
            (registry, receiver, true, None::<Vec<DownloadedEntry>>),
            |(registry, mut receiver, first, last)| async move {
                let mut first = first;
                let mut last = last;
                loop {
                    if first {
                        first = false;
                    } else if receiver.changed().await.is_err() {
                        return None;
                    }
                    match registry.list() {
                        Ok(entries) => {
                            if last.as_ref() == Some(&entries) {
                                continue;
                            }
                            last = Some(entries.clone());
                            return Some((entries, (registry, receiver, first, last)));
                        }
                        Err(error) => {
                            error!(%error, "skipping corrupt registry snapshot");
                        }
                    }
                }
            },
        )
    }
}

#[derive(Debug)]
struct Row {
    timestamp: i64,
    member: String,
    entry: DownloadedEntry,
}

fn encode_entry(timestamp: i64, entry: &DownloadedEntry) -> String {
    codec::encode_ordered(
        timestamp,
        &codec::join_fields(&[&entry.id, &entry.url, &entry.storage_uri]),
    )
}

fn decode_row(member: &str) -> Result<Row, RegistryError> {
    let (timestamp, payload) = codec::decode_ordered(member)?;
    let fields = codec::split_fields(payload);
    let [id, url, storage_uri] =
        <[String; DOWNLOADED_FIELDS]>::try_from(fields).map_err(|fields| {
            RegistryError::MalformedRecord {
                record: member.to_string(),
                found: fields.len(),
            }
        })?;
    Ok(Row {
        timestamp,
        member: member.to_string(),
        entry: DownloadedEntry {
            id,
            url,
            storage_uri,
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;

    use crate::model::{ByteStream, ContentType};
    use crate::store::MemoryStore;

    use super::*;

    /// Storage double recording calls and returning a fixed URI shape.
    #[derive(Default)]
    struct FakeStorage {
        calls: Mutex<Vec<(String, String, Option<String>)>>,
    }

    #[async_trait]
    impl VideoStorage for FakeStorage {
        async fn store(
            &self,
            directory: &str,
            file_name: &str,
            mime_type: Option<&str>,
            _bytes: ByteStream,
        ) -> Result<String, StorageError> {
            self.calls
                .lock()
                .unwrap()
                .push((directory.to_string(), file_name.to_string(), mime_type.map(String::from)));
            Ok(format!("/{directory}/{file_name}"))
        }
    }

    /// Existence double reporting a fixed answer, or only the listed URIs.
    struct FixedExistence {
        present: Option<Vec<String>>,
    }

    impl FixedExistence {
        fn always() -> Self {
            Self { present: None }
        }

        fn only(uris: &[&str]) -> Self {
            Self {
                present: Some(uris.iter().map(ToString::to_string).collect()),
            }
        }
    }

    impl FileExistence for FixedExistence {
        fn exists(&self, uri: &str) -> bool {
            self.present
                .as_ref()
                .is_none_or(|present| present.iter().any(|p| p == uri))
        }
    }

    fn registry_with(existence: FixedExistence) -> (DownloadedRegistry, Arc<FakeStorage>) {
        let storage = Arc::new(FakeStorage::default());
        let registry = DownloadedRegistry::new(
            Arc::new(MemoryStore::new()),
            storage.clone(),
            Arc::new(existence),
            "media",
        );
        (registry, storage)
    }

    fn video(id: &str, content_type: Option<ContentType>) -> MaterializedVideo {
        MaterializedVideo {
            id: id.to_string(),
            url: format!("https://example.com/v/{id}"),
            content_type,
            bytes: futures_util::stream::iter(vec![Ok(Bytes::from_static(b"data"))]).boxed(),
        }
    }

    #[tokio::test]
    async fn test_save_uses_subtype_as_extension() {
        let (registry, storage) = registry_with(FixedExistence::always());

        let entry = registry
            .save(video("abc", ContentType::from_header("video/webm")))
            .await
            .unwrap();

        assert_eq!(entry.storage_uri, "/media/abc.webm");
        let calls = storage.calls.lock().unwrap();
        assert_eq!(calls[0].1, "abc.webm");
        assert_eq!(calls[0].2.as_deref(), Some("video/webm"));
    }

    #[tokio::test]
    async fn test_save_defaults_to_mp4_extension() {
        let (registry, _storage) = registry_with(FixedExistence::always());
        let entry = registry.save(video("abc", None)).await.unwrap();
        assert_eq!(entry.storage_uri, "/media/abc.mp4");
    }

    #[tokio::test]
    async fn test_list_returns_newest_first() {
        let (registry, _storage) = registry_with(FixedExistence::always());
        registry.save(video("first", None)).await.unwrap();
        registry.save(video("second", None)).await.unwrap();

        let ids: Vec<_> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, ["second", "first"]);
    }

    #[tokio::test]
    async fn test_list_prunes_entries_with_missing_files() {
        let (registry, _storage) = registry_with(FixedExistence::only(&["/media/keep.mp4"]));
        registry.save(video("keep", None)).await.unwrap();
        registry.save(video("gone", None)).await.unwrap();

        let ids: Vec<_> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, ["keep"]);

        // The pruned set was written back; a second list with a permissive
        // existence check would still not resurrect the entry.
        assert_eq!(registry.store.get(DOWNLOADED_KEY).len(), 1);
    }

    #[tokio::test]
    async fn test_remove_drops_entry_and_keeps_others() {
        let (registry, _storage) = registry_with(FixedExistence::always());
        let first = registry.save(video("first", None)).await.unwrap();
        registry.save(video("second", None)).await.unwrap();

        registry.remove(&first).unwrap();

        let ids: Vec<_> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, ["second"]);
    }

    #[tokio::test]
    async fn test_list_surfaces_corrupt_records() {
        let (registry, _storage) = registry_with(FixedExistence::always());
        registry
            .store
            .put(DOWNLOADED_KEY, ["5_too;;few".to_string()].into());
        assert!(matches!(
            registry.list(),
            Err(RegistryError::MalformedRecord { found: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_observe_swallows_identical_rewrites() {
        let (registry, _storage) = registry_with(FixedExistence::always());
        registry.save(video("a", None)).await.unwrap();

        let mut stream = Box::pin(registry.observe());
        assert_eq!(stream.next().await.unwrap()[0].id, "a");

        // Rewriting the set with its identical value must not re-emit.
        registry
            .store
            .put(DOWNLOADED_KEY, registry.store.get(DOWNLOADED_KEY));
        let pending = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(pending.is_err(), "unchanged rewrite re-emitted: {pending:?}");

        // A real change still comes through.
        registry.save(video("b", None)).await.unwrap();
        assert_eq!(stream.next().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_observe_emits_current_value_then_changes() {
        let (registry, _storage) = registry_with(FixedExistence::always());
        let mut stream = Box::pin(registry.observe());
        assert!(stream.next().await.unwrap().is_empty());

        registry.save(video("abc", None)).await.unwrap();
        let entries = stream.next().await.unwrap();
        assert_eq!(entries[0].id, "abc");
    }
}
