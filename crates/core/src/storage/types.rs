use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage write failed: {0}")]
    WriteFailed(String),

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("URL signing failed: {0}")]
    Signing(String),

    #[error("Signed URL expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Bytes to upload, produced incrementally.
pub type UploadBody = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// A store that accepts streamed objects and hands out time-limited links.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    /// Stream `body` to `path`. The object becomes visible only if the whole
    /// body was written; returns the number of bytes stored.
    async fn put_stream(
        &self,
        path: &str,
        content_type: &str,
        body: UploadBody,
    ) -> Result<u64, StorageError>;

    /// A retrieval URL for `path` valid for `ttl`.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// A successfully published archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveArtifact {
    /// `<stem>_<uuid>`, without extension
    pub filename: String,
    pub storage_path: String,
    pub public_url: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}
