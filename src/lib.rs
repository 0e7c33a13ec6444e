//! Clipfetch Core Library
//!
//! This library implements the acquisition pipeline behind the clipfetch
//! tool: share links are queued, resolved against the hosting site, and
//! streamed to local storage, with every stage observable through watch
//! channels.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`store`] - Persisted string-set state with change notifications
//! - [`codec`] - Ordered record encoding shared by queue and registry
//! - [`queue`] - Reorderable pending queue of submitted links
//! - [`registry`] - Self-healing registry of completed downloads
//! - [`scrape`] - Session-aware client resolving links to video bytes
//! - [`processor`] - Single-flight download loop with failure states
//! - [`projector`] - Combined live view over all three sources

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::time::Duration;

pub mod backoff;
pub mod codec;
pub mod fs;
pub mod model;
pub mod processor;
pub mod progress;
pub mod projector;
pub mod queue;
pub mod registry;
pub mod scrape;
pub mod store;

// Re-export commonly used types
pub use backoff::CaptchaBackoff;
pub use fs::{DiskExistence, DiskStorage, FileExistence, StorageError, VideoStorage};
pub use model::{
    ByteStream, ContentType, DownloadedEntry, InProgressEntry, MaterializedVideo, PendingEntry,
    VideoState,
};
pub use processor::{ProcessState, Processor};
pub use progress::InProgressSlot;
pub use projector::{ProjectionError, StateProjector, remove_video_state};
pub use queue::{PendingQueue, QueueError};
pub use registry::{DownloadedRegistry, RegistryError};
pub use scrape::{ScrapeClient, ScrapeError, VideoFetcher};
pub use store::{JsonFileStore, MemoryStore, StoreError, StringSetStore};

/// Debounce window applied by the processor and projector loops.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);
