//! Storage collaborator seams and their disk implementations.
//!
//! The registry talks to storage through [`VideoStorage`] and
//! [`FileExistence`] so tests can substitute doubles and so the physical
//! write routine stays swappable. [`DiskStorage`] streams the body into a
//! temp file and renames it into place, keeping the write all-or-nothing
//! from the registry's point of view even when the pipeline is cancelled
//! mid-transfer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::model::ByteStream;

/// Errors raised while writing a fetched video to storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File system error (create directory, create file, write, rename).
    #[error("IO error writing {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The body stream failed part-way through the transfer.
    #[error("byte stream failed after {bytes_written} bytes: {source}")]
    Stream {
        /// Bytes successfully written before the failure.
        bytes_written: u64,
        /// The underlying stream error.
        #[source]
        source: std::io::Error,
    },

    /// The storage collaborator completed without producing a URI.
    #[error("storage produced no URI for the stored file")]
    MissingUri,
}

impl StorageError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Physical file-write routine consumed by the downloaded registry.
#[async_trait]
pub trait VideoStorage: Send + Sync {
    /// Stores `bytes` as `file_name` inside `directory`, returning the URI
    /// of the stored file.
    async fn store(
        &self,
        directory: &str,
        file_name: &str,
        mime_type: Option<&str>,
        bytes: ByteStream,
    ) -> Result<String, StorageError>;
}

/// Side-effect-free existence check for stored URIs.
pub trait FileExistence: Send + Sync {
    /// Returns true when `uri` still resolves to an existing file.
    fn exists(&self, uri: &str) -> bool;
}

/// [`VideoStorage`] writing into a directory tree on local disk.
///
/// URIs produced by this implementation are absolute file paths.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Creates storage rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl VideoStorage for DiskStorage {
    async fn store(
        &self,
        directory: &str,
        file_name: &str,
        mime_type: Option<&str>,
        mut bytes: ByteStream,
    ) -> Result<String, StorageError> {
        let target_dir = self.root.join(directory);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|source| StorageError::io(&target_dir, source))?;

        let final_path = target_dir.join(file_name);
        let temp_path = target_dir.join(format!("{file_name}.part"));

        debug!(path = %final_path.display(), ?mime_type, "storing video file");

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|source| StorageError::io(&temp_path, source))?;

        let mut bytes_written = 0u64;
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(source) => {
                    discard_partial(&temp_path).await;
                    return Err(StorageError::Stream {
                        bytes_written,
                        source,
                    });
                }
            };
            if let Err(source) = file.write_all(&chunk).await {
                discard_partial(&temp_path).await;
                return Err(StorageError::io(&temp_path, source));
            }
            bytes_written += chunk.len() as u64;
        }

        if let Err(source) = file.flush().await {
            discard_partial(&temp_path).await;
            return Err(StorageError::io(&temp_path, source));
        }
        drop(file);

        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|source| StorageError::io(&final_path, source))?;

        debug!(path = %final_path.display(), bytes_written, "video file stored");
        Ok(final_path.to_string_lossy().into_owned())
    }
}

/// Best-effort removal of a partially written file.
async fn discard_partial(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), %error, "failed to discard partial file");
    }
}

/// [`FileExistence`] resolving URIs as local file paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskExistence;

impl FileExistence for DiskExistence {
    fn exists(&self, uri: &str) -> bool {
        Path::new(uri).exists()
    }
}
