//! Single-flight download processor.
//!
//! A background task watches the pending queue and works its newest entry:
//! mark in progress, fetch, store, record, dequeue. Only one download is
//! ever in flight. Failures are published as classified states and halt the
//! loop until an explicit retry, so a dead network or an armed captcha gate
//! does not burn through the queue.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backoff::CaptchaBackoff;
use crate::fs::StorageError;
use crate::model::{DownloadedEntry, PendingEntry};
use crate::progress::InProgressSlot;
use crate::queue::{PendingQueue, QueueError};
use crate::registry::{DownloadedRegistry, RegistryError};
use crate::scrape::{ScrapeError, VideoFetcher};

/// Published lifecycle of the processing loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// An entry is being worked.
    Processing(PendingEntry),
    /// The entry completed and was recorded.
    Processed(DownloadedEntry),
    /// The queue is empty; nothing left to work.
    Finished,
    /// The fetch failed at the transport level.
    NetworkError,
    /// The fetched page could not be parsed.
    ParsingError,
    /// The site demanded a captcha; the cooldown gate is armed.
    CaptchaError,
    /// The fetched video could not be written to storage.
    StorageError,
    /// Persisted state was unreadable or otherwise unclassifiable.
    UnknownError,
}

impl ProcessState {
    /// Returns true for states that halt the loop until a retry.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::NetworkError
                | Self::ParsingError
                | Self::CaptchaError
                | Self::StorageError
                | Self::UnknownError
        )
    }
}

/// Internal failure funnel feeding state classification.
#[derive(Debug, Error)]
enum ProcessFailure {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Maps a failure to its published state, arming the captcha gate when the
/// failure was a challenge.
fn classify(failure: &ProcessFailure, backoff: &CaptchaBackoff) -> ProcessState {
    match failure {
        ProcessFailure::Scrape(
            ScrapeError::Network { .. } | ScrapeError::HttpStatus { .. } | ScrapeError::Client(_),
        ) => ProcessState::NetworkError,
        ProcessFailure::Scrape(ScrapeError::Parsing { .. }) => ProcessState::ParsingError,
        ProcessFailure::Scrape(ScrapeError::CaptchaRequired { .. }) => {
            backoff.arm();
            ProcessState::CaptchaError
        }
        ProcessFailure::Storage(_) => ProcessState::StorageError,
        ProcessFailure::Queue(_) | ProcessFailure::Registry(_) => ProcessState::UnknownError,
    }
}

/// Everything one download needs, bundled for the worker loop.
struct Worker {
    fetcher: Arc<dyn VideoFetcher>,
    queue: PendingQueue,
    registry: DownloadedRegistry,
    progress: Arc<InProgressSlot>,
    backoff: CaptchaBackoff,
}

impl Worker {
    /// Runs one download attempt to completion.
    async fn attempt(&self, entry: &PendingEntry) -> Result<DownloadedEntry, ProcessFailure> {
        // A link re-submitted after completion is satisfied from the
        // registry without touching the network.
        if let Some(existing) = self
            .registry
            .list()?
            .into_iter()
            .find(|downloaded| downloaded.id == entry.id)
        {
            info!(id = %entry.id, "already downloaded, dequeueing");
            self.queue.remove(entry)?;
            return Ok(existing);
        }

        if self.backoff.is_active() {
            return Err(ScrapeError::CaptchaRequired {
                reason: "captcha cooldown active",
            }
            .into());
        }

        self.progress.mark(entry);
        let video = self.fetcher.fetch(entry).await?;
        let downloaded = self.registry.save(video).await?;
        self.queue.remove(entry)?;
        Ok(downloaded)
    }

    /// Attempts `entry`, always clearing the in-progress marker afterwards.
    async fn process_entry(&self, entry: &PendingEntry) -> ProcessState {
        let outcome = self.attempt(entry).await;
        self.progress.clear_if_matching(entry);
        match outcome {
            Ok(downloaded) => ProcessState::Processed(downloaded),
            Err(failure) => {
                warn!(id = %entry.id, error = %failure, "download attempt failed");
                classify(&failure, &self.backoff)
            }
        }
    }
}

/// Handle to the background processing task.
pub struct Processor {
    states: watch::Receiver<Option<ProcessState>>,
    retry_tx: watch::Sender<u64>,
    task: JoinHandle<()>,
}

impl Processor {
    /// Spawns the processing loop.
    ///
    /// Queue changes arriving within `debounce` of each other collapse into
    /// a single pass. The loop works the newest pending entry; after an
    /// error state it halts until [`Processor::retry`].
    #[must_use]
    pub fn spawn(
        fetcher: Arc<dyn VideoFetcher>,
        queue: PendingQueue,
        registry: DownloadedRegistry,
        progress: Arc<InProgressSlot>,
        backoff: CaptchaBackoff,
        debounce: Duration,
    ) -> Self {
        let (state_tx, states) = watch::channel(None);
        let (retry_tx, retry_rx) = watch::channel(0u64);
        let worker = Worker {
            fetcher,
            queue,
            registry,
            progress,
            backoff,
        };

        let task = tokio::spawn(run(worker, state_tx, retry_rx, debounce));
        Self {
            states,
            retry_tx,
            task,
        }
    }

    /// Subscribes to published lifecycle states.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<ProcessState>> {
        self.states.clone()
    }

    /// Requests another pass after an error halted the loop.
    ///
    /// A no-op while the loop is running normally.
    pub fn retry(&self) {
        self.retry_tx.send_modify(|round| *round += 1);
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    worker: Worker,
    state_tx: watch::Sender<Option<ProcessState>>,
    mut retry_rx: watch::Receiver<u64>,
    debounce: Duration,
) {
    let mut pending_rx = worker.queue.changes();
    let mut first = true;
    let mut halted = false;
    let mut force = false;
    let mut last_signal: Option<Option<PendingEntry>> = None;

    loop {
        if first {
            first = false;
        } else {
            tokio::select! {
                changed = pending_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    // While halted the queue may keep changing underneath;
                    // those changes are picked up by the retry pass.
                    if halted {
                        pending_rx.borrow_and_update();
                        continue;
                    }
                }
                changed = retry_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    retry_rx.borrow_and_update();
                    if !halted {
                        continue;
                    }
                    halted = false;
                    force = true;
                }
            }
        }

        // Collapse bursts of queue changes into one pass.
        loop {
            tokio::select! {
                () = tokio::time::sleep(debounce) => break,
                changed = pending_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
        pending_rx.borrow_and_update();

        let active = match worker.queue.list() {
            Ok(entries) => entries.last().cloned(),
            Err(queue_error) => {
                error!(error = %queue_error, "pending queue unreadable");
                publish(&state_tx, ProcessState::UnknownError).await;
                halted = true;
                last_signal = None;
                continue;
            }
        };

        if !force && last_signal.as_ref() == Some(&active) {
            continue;
        }
        force = false;
        last_signal = Some(active.clone());

        match active {
            None => publish(&state_tx, ProcessState::Finished).await,
            Some(entry) => {
                publish(&state_tx, ProcessState::Processing(entry.clone())).await;
                let state = worker.process_entry(&entry).await;
                halted = state.is_error();
                publish(&state_tx, state).await;
            }
        }
    }
}

/// Publishes `state` unless it equals the current value, then yields so
/// same-thread subscribers observe the transition before the next one.
async fn publish(tx: &watch::Sender<Option<ProcessState>>, state: ProcessState) {
    tx.send_if_modified(|current| {
        if current.as_ref() == Some(&state) {
            false
        } else {
            *current = Some(state);
            true
        }
    });
    tokio::task::yield_now().await;
}
