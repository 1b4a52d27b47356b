//! Mock image source for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::source::{ImageRecord, ImageSource, SourceError};

/// Mock implementation of the ImageSource trait.
///
/// Provides controllable behavior for testing:
/// - Return configured records per tag query (unknown queries match nothing)
/// - Track searched queries and peak concurrency
/// - Simulate failures and slow upstreams
#[derive(Debug, Default)]
pub struct MockImageSource {
    /// Configured records by exact tag string.
    results: Arc<RwLock<HashMap<String, Vec<ImageRecord>>>>,
    /// If set, the next search will fail with this error.
    next_error: Arc<RwLock<Option<SourceError>>>,
    /// Simulated upstream latency.
    delay: Arc<RwLock<Option<Duration>>>,
    /// Recorded tag queries.
    searches: Arc<RwLock<Vec<String>>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockImageSource {
    /// Create a new mock source with no results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the records returned for `tags`.
    pub async fn set_results(&self, tags: &str, records: Vec<ImageRecord>) {
        self.results.write().await.insert(tags.to_string(), records);
    }

    /// Make the next search fail.
    pub async fn set_next_error(&self, error: SourceError) {
        *self.next_error.write().await = Some(error);
    }

    /// Delay every search by `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Tag queries searched so far, in order.
    pub async fn recorded_searches(&self) -> Vec<String> {
        self.searches.read().await.clone()
    }

    /// Number of searches started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most searches observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn respond(&self, tags: &str) -> Result<Vec<ImageRecord>, SourceError> {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        Ok(self
            .results
            .read()
            .await
            .get(tags)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(&self, tags: &str) -> Result<Vec<ImageRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.searches.write().await.push(tags.to_string());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let result = self.respond(tags).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        result
    }
}
