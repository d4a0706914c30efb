//! Audio blobs: remote source and lazy local cache.

mod downloader;
mod source;

use thiserror::Error;

pub use downloader::LazyBlobDownloader;
pub use source::{BlobBytes, BlobSource, HttpBlobSource, PresignResponse, PresignedOperation};

/// Errors of a blob download. None of them leaves partial state behind, so
/// callers may retry.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record {0} has no remote audio")]
    NoRemoteBlob(String),

    #[error("Blob fetch failed: {0}")]
    Fetch(String),

    #[error("Blob IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::Error),
}
