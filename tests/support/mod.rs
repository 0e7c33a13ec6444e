//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use clipfetch_core::{
    ByteStream, ContentType, FileExistence, MaterializedVideo, PendingEntry, ScrapeError,
    StorageError, VideoFetcher, VideoStorage,
};

/// Builds a one-chunk body stream.
pub fn body(data: &'static [u8]) -> ByteStream {
    futures_util::stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
}

/// Builds a materialized video for `entry` with an mp4 body.
pub fn materialized(entry: &PendingEntry) -> MaterializedVideo {
    MaterializedVideo {
        id: entry.id.clone(),
        url: entry.url.clone(),
        content_type: ContentType::from_header("video/mp4"),
        bytes: body(b"video-bytes"),
    }
}

/// [`VideoFetcher`] double replaying a programmed sequence of outcomes.
///
/// Outcomes are taken front to back; once the script runs out every further
/// call parses-fails, which keeps runaway loops visible in tests.
#[derive(Default)]
pub struct FakeFetcher {
    script: Mutex<VecDeque<Result<MaterializedVideo, ScrapeError>>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<MaterializedVideo, ScrapeError>) {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoFetcher for FakeFetcher {
    async fn fetch(&self, _entry: &PendingEntry) -> Result<MaterializedVideo, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Err(ScrapeError::Parsing {
                context: "fetcher script exhausted",
            }))
    }
}

/// [`VideoStorage`] double recording stored files in memory.
#[derive(Default)]
pub struct CapturingStorage {
    stored: Mutex<Vec<(String, Vec<u8>)>>,
}

impl CapturingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The (file name, body) pairs stored so far.
    pub fn stored(&self) -> Vec<(String, Vec<u8>)> {
        self.stored
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VideoStorage for CapturingStorage {
    async fn store(
        &self,
        directory: &str,
        file_name: &str,
        _mime_type: Option<&str>,
        mut bytes: ByteStream,
    ) -> Result<String, StorageError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|source| StorageError::Stream {
                bytes_written: buffer.len() as u64,
                source,
            })?;
            buffer.extend_from_slice(&chunk);
        }
        self.stored
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((file_name.to_string(), buffer));
        Ok(format!("/{directory}/{file_name}"))
    }
}

/// [`FileExistence`] double answering a fixed value.
pub struct FixedExistence(pub bool);

impl FileExistence for FixedExistence {
    fn exists(&self, _uri: &str) -> bool {
        self.0
    }
}
