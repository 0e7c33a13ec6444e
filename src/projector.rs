//! Reactive projection of the three live sources into one state list.
//!
//! The projector owns a background task that watches the in-progress slot,
//! the pending queue and the downloaded registry, debounces bursts of
//! changes, and publishes a combined ordered list: the in-flight entry
//! first, then the pending queue (minus the in-flight link), then the
//! downloads newest first.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

use crate::model::VideoState;
use crate::progress::InProgressSlot;
use crate::queue::{PendingQueue, QueueError};
use crate::registry::{DownloadedRegistry, RegistryError};

/// Errors from reading the projection sources.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The pending queue could not be read.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The downloaded registry could not be read.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Background projection task with its published output.
pub struct StateProjector {
    rx: watch::Receiver<Vec<VideoState>>,
    task: JoinHandle<()>,
}

impl StateProjector {
    /// Spawns the projection task.
    ///
    /// Changes arriving within `debounce` of each other collapse into a
    /// single recomputation. Identical recomputed lists are not republished.
    #[must_use]
    pub fn spawn(
        progress: &InProgressSlot,
        queue: PendingQueue,
        registry: DownloadedRegistry,
        debounce: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        let mut progress_rx = progress.subscribe();
        let mut pending_rx = queue.changes();
        let mut downloaded_rx = registry.changes();

        let task = tokio::spawn(async move {
            let mut first = true;
            loop {
                if first {
                    first = false;
                } else {
                    let changed = tokio::select! {
                        changed = progress_rx.changed() => changed,
                        changed = pending_rx.changed() => changed,
                        changed = downloaded_rx.changed() => changed,
                    };
                    if changed.is_err() {
                        return;
                    }
                }

                // Collapse any further changes arriving within the window.
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(debounce) => break,
                        changed = progress_rx.changed() => {
                            if changed.is_err() { return; }
                        }
                        changed = pending_rx.changed() => {
                            if changed.is_err() { return; }
                        }
                        changed = downloaded_rx.changed() => {
                            if changed.is_err() { return; }
                        }
                    }
                }

                pending_rx.borrow_and_update();
                downloaded_rx.borrow_and_update();
                let current = progress_rx.borrow_and_update().clone();
                match project(current.as_ref(), &queue, &registry) {
                    Ok(states) => {
                        tx.send_if_modified(|previous| {
                            if *previous == states {
                                false
                            } else {
                                *previous = states;
                                true
                            }
                        });
                    }
                    Err(error) => {
                        error!(%error, "skipping unreadable projection tick");
                    }
                }
            }
        });

        Self { rx, task }
    }

    /// Subscribes to the projected state list.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<VideoState>> {
        self.rx.clone()
    }
}

impl Drop for StateProjector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn project(
    in_progress: Option<&crate::model::InProgressEntry>,
    queue: &PendingQueue,
    registry: &DownloadedRegistry,
) -> Result<Vec<VideoState>, ProjectionError> {
    let pending = queue.list()?;
    let downloaded = registry.list()?;

    let mut states = Vec::with_capacity(pending.len() + downloaded.len() + 1);
    if let Some(active) = in_progress {
        states.push(VideoState::InProcess(active.clone()));
    }
    states.extend(
        pending
            .into_iter()
            .filter(|entry| in_progress.is_none_or(|active| active.url != entry.url))
            .map(VideoState::InPending),
    );
    states.extend(downloaded.into_iter().map(VideoState::Downloaded));
    Ok(states)
}

/// Removes the underlying record of `state` from whichever source holds it.
///
/// In-flight entries have no removable record and are left alone.
///
/// # Errors
///
/// Returns [`ProjectionError`] when the holding source is unreadable.
pub fn remove_video_state(
    queue: &PendingQueue,
    registry: &DownloadedRegistry,
    state: &VideoState,
) -> Result<(), ProjectionError> {
    match state {
        VideoState::InPending(entry) => queue.remove(entry)?,
        VideoState::Downloaded(entry) => registry.remove(entry)?,
        VideoState::InProcess(_) => {}
    }
    Ok(())
}
