//! Persisted, reorderable queue of not-yet-downloaded links.
//!
//! Members live in the string-set store as ordered records
//! (`{millis}_{id};;{url}`); the logical sequence is the set sorted by the
//! embedded timestamp, oldest first. Reordering rewrites timestamps rather
//! than payloads, so an entry's identity never changes while it moves.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::Stream;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use crate::codec::{self, CodecError};
use crate::model::PendingEntry;
use crate::store::StringSetStore;

/// Store key holding the encoded pending members.
const PENDING_KEY: &str = "pending_videos";

/// Number of payload fields in a pending record (`id`, `url`).
const PENDING_FIELDS: usize = 2;

/// Errors raised by pending-queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A persisted record could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A record decoded into the wrong number of fields.
    #[error("queue record {record:?} decoded into {found} fields, expected {PENDING_FIELDS}")]
    MalformedRecord {
        /// The raw record that failed to decode.
        record: String,
        /// The number of fields actually found.
        found: usize,
    },

    /// The entry to move is not in the queue.
    #[error("queue entry not found: id {id}")]
    EntryNotFound {
        /// The missing entry's id.
        id: String,
    },

    /// A move would land outside the queue.
    #[error("cannot move entry at index {index} by {offset} in a queue of {len}")]
    InvalidMove {
        /// The entry's current index.
        index: usize,
        /// The requested offset.
        offset: isize,
        /// The queue length.
        len: usize,
    },

    /// A submitted link is not an http(s) URL.
    #[error("not a valid http(s) URL: {input:?}")]
    InvalidUrl {
        /// The rejected input.
        input: String,
    },
}

/// A decoded member together with its raw persisted form.
#[derive(Debug, Clone)]
struct Row {
    timestamp: i64,
    entry: PendingEntry,
}

/// Ordered, persisted collection of pending links.
#[derive(Clone)]
pub struct PendingQueue {
    store: Arc<dyn StringSetStore>,
}

impl PendingQueue {
    /// Creates a queue over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StringSetStore>) -> Self {
        Self { store }
    }

    /// Validates `url`, assigns a fresh id, and appends it to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidUrl`] when the input is not an http(s)
    /// URL.
    pub fn submit(&self, url: &str) -> Result<PendingEntry, QueueError> {
        let parsed = Url::parse(url).map_err(|_| QueueError::InvalidUrl {
            input: url.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(QueueError::InvalidUrl {
                input: url.to_string(),
            });
        }

        let entry = PendingEntry {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
        };
        self.append(&entry);
        debug!(id = %entry.id, url = %entry.url, "link queued");
        Ok(entry)
    }

    /// Returns the queue in submission order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when a persisted record is corrupt.
    pub fn list(&self) -> Result<Vec<PendingEntry>, QueueError> {
        let rows = decode_rows(&self.store.get(PENDING_KEY))?;
        Ok(rows.into_iter().map(|row| row.entry).collect())
    }

    /// Appends `entry` with a fresh ordering timestamp.
    pub fn append(&self, entry: &PendingEntry) {
        let mut members = self.store.get(PENDING_KEY);
        members.insert(encode_entry(codec::next_timestamp_millis(), entry));
        self.store.put(PENDING_KEY, members);
    }

    /// Removes `entry` from the queue; a no-op when absent.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when a persisted record is corrupt.
    pub fn remove(&self, entry: &PendingEntry) -> Result<(), QueueError> {
        let members = self.store.get(PENDING_KEY);
        let mut kept = HashSet::with_capacity(members.len());
        for member in members {
            let row = decode_row(&member)?;
            if row.entry != *entry {
                kept.insert(member);
            }
        }
        self.store.put(PENDING_KEY, kept);
        Ok(())
    }

    /// Repositions `entry` by `offset` slots in the ordered queue.
    ///
    /// Negative offsets move the entry earlier, positive later. The result
    /// is the same as deleting the entry and reinserting it at the shifted
    /// index: every other entry keeps its relative order. Timestamps are
    /// redistributed over the new arrangement so the stored ordering stays
    /// strict.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EntryNotFound`] when `entry` is absent and
    /// [`QueueError::InvalidMove`] when the target index falls outside the
    /// queue.
    pub fn move_by(&self, entry: &PendingEntry, offset: isize) -> Result<(), QueueError> {
        if offset == 0 {
            return Ok(());
        }

        let rows = decode_rows(&self.store.get(PENDING_KEY))?;
        let index = rows
            .iter()
            .position(|row| row.entry == *entry)
            .ok_or_else(|| QueueError::EntryNotFound {
                id: entry.id.clone(),
            })?;

        let target = index
            .checked_add_signed(offset)
            .filter(|target| *target < rows.len())
            .ok_or(QueueError::InvalidMove {
                index,
                offset,
                len: rows.len(),
            })?;

        // The sorted timestamps stay where they are; only the payloads are
        // rearranged underneath them, which shifts everything between the
        // old and new position by one slot toward the old position.
        let timestamps: Vec<i64> = rows.iter().map(|row| row.timestamp).collect();
        let mut entries: Vec<PendingEntry> = rows.into_iter().map(|row| row.entry).collect();
        let moved = entries.remove(index);
        entries.insert(target, moved);

        let members = timestamps
            .into_iter()
            .zip(entries)
            .map(|(timestamp, entry)| encode_entry(timestamp, &entry))
            .collect();
        self.store.put(PENDING_KEY, members);
        Ok(())
    }

    /// Subscribes to raw change notifications of the underlying store.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<HashSet<String>> {
        self.store.watch(PENDING_KEY)
    }

    /// Streams the decoded queue: the current value immediately, then one
    /// item per store change. Corrupt snapshots are logged and skipped.
    pub fn observe(&self) -> impl Stream<Item = Vec<PendingEntry>> + Send + 'static {
        let queue = self.clone();
        let receiver = self.changes();
        futures_util::stream::unfold(
            (queue, receiver, true),
            |(queue, mut receiver, first)| async move {
                let mut first = first;
                loop {
                    if first {
                        first = false;
                    } else if receiver.changed().await.is_err() {
                        return None;
                    }
                    match queue.list() {
                        Ok(entries) => return Some((entries, (queue, receiver, first))),
                        Err(error) => {
                            error!(%error, "skipping corrupt pending-queue snapshot");
                        }
                    }
                }
            },
        )
    }
}

fn encode_entry(timestamp: i64, entry: &PendingEntry) -> String {
    codec::encode_ordered(timestamp, &codec::join_fields(&[&entry.id, &entry.url]))
}

fn decode_row(member: &str) -> Result<Row, QueueError> {
    let (timestamp, payload) = codec::decode_ordered(member)?;
    let fields = codec::split_fields(payload);
    let [id, url] = <[String; PENDING_FIELDS]>::try_from(fields).map_err(|fields| {
        QueueError::MalformedRecord {
            record: member.to_string(),
            found: fields.len(),
        }
    })?;
    Ok(Row {
        timestamp,
        entry: PendingEntry { id, url },
    })
}

/// Decodes and sorts all members, oldest timestamp first.
fn decode_rows(members: &HashSet<String>) -> Result<Vec<Row>, QueueError> {
    let mut rows = members
        .iter()
        .map(|member| decode_row(member))
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by_key(|row| row.timestamp);
    Ok(rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;

    use crate::store::MemoryStore;

    use super::*;

    fn queue() -> PendingQueue {
        PendingQueue::new(Arc::new(MemoryStore::new()))
    }

    fn entry(id: &str) -> PendingEntry {
        PendingEntry {
            id: id.to_string(),
            url: format!("https://example.com/v/{id}"),
        }
    }

    fn ids(entries: &[PendingEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.id.as_str()).collect()
    }

    #[test]
    fn test_list_empty_queue() {
        assert!(queue().list().unwrap().is_empty());
    }

    #[test]
    fn test_append_preserves_submission_order() {
        let queue = queue();
        for id in ["a", "b", "c"] {
            queue.append(&entry(id));
        }
        assert_eq!(ids(&queue.list().unwrap()), ["a", "b", "c"]);
    }

    #[test]
    fn test_submit_generates_fresh_ids() {
        let queue = queue();
        let first = queue.submit("https://example.com/v/1").unwrap();
        let second = queue.submit("https://example.com/v/1").unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(queue.list().unwrap().len(), 2);
    }

    #[test]
    fn test_submit_rejects_invalid_input() {
        let queue = queue();
        assert!(matches!(
            queue.submit("not a url"),
            Err(QueueError::InvalidUrl { .. })
        ));
        assert!(matches!(
            queue.submit("ftp://example.com/file"),
            Err(QueueError::InvalidUrl { .. })
        ));
        assert!(queue.list().unwrap().is_empty());
    }

    #[test]
    fn test_remove_drops_matching_entry() {
        let queue = queue();
        queue.append(&entry("a"));
        queue.append(&entry("b"));

        queue.remove(&entry("a")).unwrap();
        assert_eq!(ids(&queue.list().unwrap()), ["b"]);
    }

    #[test]
    fn test_remove_absent_entry_is_noop() {
        let queue = queue();
        queue.append(&entry("a"));
        queue.remove(&entry("ghost")).unwrap();
        assert_eq!(ids(&queue.list().unwrap()), ["a"]);
    }

    #[test]
    fn test_move_by_zero_is_noop() {
        let queue = queue();
        queue.append(&entry("a"));
        queue.append(&entry("b"));
        queue.move_by(&entry("a"), 0).unwrap();
        assert_eq!(ids(&queue.list().unwrap()), ["a", "b"]);
    }

    #[test]
    fn test_move_by_one_swaps_neighbours() {
        let queue = queue();
        queue.append(&entry("a"));
        queue.append(&entry("b"));

        queue.move_by(&entry("b"), -1).unwrap();
        assert_eq!(ids(&queue.list().unwrap()), ["b", "a"]);

        queue.move_by(&entry("b"), 1).unwrap();
        assert_eq!(ids(&queue.list().unwrap()), ["a", "b"]);
    }

    #[test]
    fn test_move_by_multiple_slots_matches_reinsertion() {
        let queue = queue();
        for id in ["a", "b", "c", "d", "e"] {
            queue.append(&entry(id));
        }

        // Same as removing "e" and reinserting it at index 1.
        queue.move_by(&entry("e"), -3).unwrap();
        assert_eq!(ids(&queue.list().unwrap()), ["a", "e", "b", "c", "d"]);

        // And forward again, against the state left by the previous move.
        queue.move_by(&entry("e"), 2).unwrap();
        assert_eq!(ids(&queue.list().unwrap()), ["a", "b", "c", "e", "d"]);
    }

    #[test]
    fn test_move_by_keeps_ordering_strict() {
        let queue = queue();
        for id in ["a", "b", "c", "d"] {
            queue.append(&entry(id));
        }
        queue.move_by(&entry("d"), -3).unwrap();

        let rows = decode_rows(&queue.store.get(PENDING_KEY)).unwrap();
        for pair in rows.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_move_by_out_of_range_is_rejected() {
        let queue = queue();
        queue.append(&entry("a"));
        queue.append(&entry("b"));

        assert!(matches!(
            queue.move_by(&entry("a"), -1),
            Err(QueueError::InvalidMove { .. })
        ));
        assert!(matches!(
            queue.move_by(&entry("b"), 1),
            Err(QueueError::InvalidMove { .. })
        ));
        assert_eq!(ids(&queue.list().unwrap()), ["a", "b"]);
    }

    #[test]
    fn test_move_by_unknown_entry_is_rejected() {
        let queue = queue();
        queue.append(&entry("a"));
        assert!(matches!(
            queue.move_by(&entry("ghost"), 1),
            Err(QueueError::EntryNotFound { .. })
        ));
    }

    #[test]
    fn test_entries_with_separator_heavy_urls_roundtrip() {
        let queue = queue();
        let tricky = PendingEntry {
            id: "id;with;separators".to_string(),
            url: "https://example.com/v?a=1;;b=2_c\\d".to_string(),
        };
        queue.append(&tricky);
        assert_eq!(queue.list().unwrap(), [tricky]);
    }

    #[test]
    fn test_list_surfaces_corrupt_records() {
        let queue = queue();
        queue
            .store
            .put(PENDING_KEY, ["garbage without sentinel".to_string()].into());
        assert!(matches!(queue.list(), Err(QueueError::Codec(_))));
    }

    #[test]
    fn test_list_surfaces_wrong_field_count() {
        let queue = queue();
        queue
            .store
            .put(PENDING_KEY, ["12_only-one-field".to_string()].into());
        assert!(matches!(
            queue.list(),
            Err(QueueError::MalformedRecord { found: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_observe_emits_current_value_then_changes() {
        let queue = queue();
        queue.append(&entry("a"));

        let mut stream = Box::pin(queue.observe());
        assert_eq!(ids(&stream.next().await.unwrap()), ["a"]);

        queue.append(&entry("b"));
        assert_eq!(ids(&stream.next().await.unwrap()), ["a", "b"]);
    }
}
