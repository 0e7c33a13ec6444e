//! Core data types shared across the acquisition pipeline.

use std::fmt;

use bytes::Bytes;
use futures_util::stream::BoxStream;

/// Byte stream of a video body, as handed from the scrape client to storage.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// A submitted link waiting to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingEntry {
    /// Opaque identity, generated fresh on submission.
    pub id: String,
    /// The share link as submitted.
    pub url: String,
}

/// A completed download with its verified storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadedEntry {
    /// Identity inherited from the pending entry.
    pub id: String,
    /// The share link the video was fetched from.
    pub url: String,
    /// URI returned by the storage collaborator.
    pub storage_uri: String,
}

/// The single entry currently being fetched, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InProgressEntry {
    /// Identity inherited from the pending entry.
    pub id: String,
    /// The share link being fetched.
    pub url: String,
}

/// Parsed `Content-Type` of a fetched video body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Top-level type, e.g. `video`.
    pub kind: String,
    /// Subtype, e.g. `mp4`; also used as the stored file extension.
    pub subtype: String,
}

impl ContentType {
    /// Parses a `Content-Type` header value, ignoring any parameters.
    ///
    /// Returns `None` when the value has no `type/subtype` shape.
    #[must_use]
    pub fn from_header(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or(value).trim();
        let (kind, subtype) = essence.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(Self {
            kind: kind.to_string(),
            subtype: subtype.to_string(),
        })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

/// A resolved video ready to be written to storage.
///
/// Carries the original identity, the reported content type and the
/// not-yet-consumed body stream.
pub struct MaterializedVideo {
    /// Identity inherited from the pending entry.
    pub id: String,
    /// The share link the video was fetched from.
    pub url: String,
    /// Reported content type, when the server sent one.
    pub content_type: Option<ContentType>,
    /// The video body.
    pub bytes: ByteStream,
}

impl fmt::Debug for MaterializedVideo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedVideo")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Projected state of a single video across the three live sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoState {
    /// Currently being fetched.
    InProcess(InProgressEntry),
    /// Waiting in the pending queue.
    InPending(PendingEntry),
    /// Completed and stored.
    Downloaded(DownloadedEntry),
}

impl VideoState {
    /// Returns the identity of the underlying entry.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::InProcess(entry) => &entry.id,
            Self::InPending(entry) => &entry.id,
            Self::Downloaded(entry) => &entry.id,
        }
    }

    /// Returns the share link of the underlying entry.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::InProcess(entry) => &entry.url,
            Self::InPending(entry) => &entry.url,
            Self::Downloaded(entry) => &entry.url,
        }
    }
}
