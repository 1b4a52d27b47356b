use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors downloading a single image. Never fatal to a job.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request timeout")]
    Timeout,

    #[error("Body read failed: {0}")]
    Body(String),
}

/// Body of one image, delivered in chunks as it downloads.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Opens image URLs as byte streams.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    fn name(&self) -> &str;

    /// Start downloading `url`. Resolves once the response headers are in.
    async fn open(&self, url: &str) -> Result<ByteStream, FetchError>;
}
