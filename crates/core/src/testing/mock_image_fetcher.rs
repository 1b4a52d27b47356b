//! Mock image fetcher for testing.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::fetcher::{ByteStream, FetchError, ImageFetcher};
use crate::source::ImageRecord;

use super::fixtures;

#[derive(Debug, Clone)]
enum MockBody {
    Chunks(Vec<Bytes>),
    FailAfter(Vec<Bytes>, FetchError),
    OpenError(FetchError),
}

/// Mock implementation of the ImageFetcher trait.
///
/// URLs without a configured body fail to open with HTTP 404.
#[derive(Debug, Default)]
pub struct MockImageFetcher {
    bodies: Arc<RwLock<HashMap<String, MockBody>>>,
    opened: Arc<RwLock<Vec<String>>>,
}

impl MockImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` as a single chunk.
    pub async fn set_body(&self, url: &str, body: Vec<u8>) {
        self.set_chunks(url, vec![Bytes::from(body)]).await;
    }

    /// Serve `chunks` one by one.
    pub async fn set_chunks(&self, url: &str, chunks: Vec<Bytes>) {
        self.bodies
            .write()
            .await
            .insert(url.to_string(), MockBody::Chunks(chunks));
    }

    /// Fail when opening `url`.
    pub async fn set_open_error(&self, url: &str, error: FetchError) {
        self.bodies
            .write()
            .await
            .insert(url.to_string(), MockBody::OpenError(error));
    }

    /// Serve `chunks`, then fail the body with `error`.
    pub async fn set_fail_after(&self, url: &str, chunks: Vec<Bytes>, error: FetchError) {
        self.bodies
            .write()
            .await
            .insert(url.to_string(), MockBody::FailAfter(chunks, error));
    }

    /// Serve [`fixtures::image_bytes`] for every record.
    pub async fn serve_records(&self, records: &[ImageRecord]) {
        for record in records {
            self.set_body(&record.source_url, fixtures::image_bytes(record))
                .await;
        }
    }

    /// URLs opened so far, in order.
    pub async fn opened_urls(&self) -> Vec<String> {
        self.opened.read().await.clone()
    }
}

#[async_trait]
impl ImageFetcher for MockImageFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, url: &str) -> Result<ByteStream, FetchError> {
        self.opened.write().await.push(url.to_string());

        match self.bodies.read().await.get(url).cloned() {
            Some(MockBody::Chunks(chunks)) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Some(MockBody::FailAfter(chunks, error)) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::once(async move { Err(error) }))
                .boxed()),
            Some(MockBody::OpenError(error)) => Err(error),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
