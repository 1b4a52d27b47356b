use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One candidate image returned by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub source_url: String,
    pub title: String,
    /// Zero-based position in the source's result order.
    pub index: usize,
}

/// Errors from an image source. Every variant means the source was
/// unavailable; an empty result is not an error.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Image source connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Image source API error: {0}")]
    ApiError(String),

    #[error("Image source request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Searches an external catalog for images matching a tag query.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Source name for logging/audit.
    fn name(&self) -> &str;

    /// Return matches for `tags` (a comma-separated tag list) in source order.
    async fn search(&self, tags: &str) -> Result<Vec<ImageRecord>, SourceError>;
}

/// Search `source` and keep at most `max` records, reindexed from zero.
pub async fn fetch_capped(
    source: &dyn ImageSource,
    tags: &str,
    max: usize,
) -> Result<Vec<ImageRecord>, SourceError> {
    let mut records = source.search(tags).await?;
    let total = records.len();
    records.truncate(max);
    for (index, record) in records.iter_mut().enumerate() {
        record.index = index;
    }

    tracing::debug!(
        source = source.name(),
        tags = %tags,
        total,
        kept = records.len(),
        "Fetched image records"
    );
    Ok(records)
}
