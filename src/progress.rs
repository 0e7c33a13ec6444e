//! Single-slot marker for the entry currently being fetched.

use tokio::sync::watch;

use crate::model::{InProgressEntry, PendingEntry};

/// Watchable slot holding at most one in-flight entry.
///
/// The processor marks an entry before fetching and clears it afterwards.
/// Clearing is guarded by identity so a stale clear from a superseded
/// attempt cannot wipe a newer mark.
#[derive(Debug)]
pub struct InProgressSlot {
    tx: watch::Sender<Option<InProgressEntry>>,
}

impl Default for InProgressSlot {
    fn default() -> Self {
        Self {
            tx: watch::channel(None).0,
        }
    }
}

impl InProgressSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `entry` as in flight, replacing any previous occupant.
    pub fn mark(&self, entry: &PendingEntry) {
        self.tx.send_replace(Some(InProgressEntry {
            id: entry.id.clone(),
            url: entry.url.clone(),
        }));
    }

    /// Clears the slot, but only while it still holds `entry`.
    pub fn clear_if_matching(&self, entry: &PendingEntry) {
        self.tx.send_if_modified(|current| {
            if current.as_ref().is_some_and(|held| held.id == entry.id) {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    /// Returns the current occupant, if any.
    #[must_use]
    pub fn current(&self) -> Option<InProgressEntry> {
        self.tx.borrow().clone()
    }

    /// Subscribes to slot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<InProgressEntry>> {
        self.tx.subscribe()
    }
}
