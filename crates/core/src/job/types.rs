use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::source::SourceError;
use crate::storage::StorageError;

/// Reason recorded when a tag query matches nothing.
pub const NO_MATCHES: &str = "No photos found";

/// A decoded request to build an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Comma-separated tags, exactly as submitted. Also the status key.
    pub tags: String,
    pub submitted_at: DateTime<Utc>,
    /// Queue message this request came from, for logs.
    pub message_id: Option<String>,
}

impl JobRequest {
    pub fn new(tags: impl Into<String>) -> Self {
        Self {
            tags: tags.into(),
            submitted_at: Utc::now(),
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Job-level failures. The request should be retried.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("{0}")]
    Archive(#[from] ArchiveError),

    #[error("{0}")]
    Storage(#[from] StorageError),
}
