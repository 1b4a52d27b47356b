//! Mock object store for testing.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::storage::{ObjectStore, StorageError, UploadBody};

#[derive(Debug, Clone)]
struct StoredObject {
    content_type: String,
    data: Vec<u8>,
}

/// In-memory implementation of the ObjectStore trait.
///
/// Signed URLs look like `https://mock-storage.local/<path>?ttl=<secs>`.
#[derive(Debug, Default)]
pub struct MockObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    /// TTLs requested from `signed_url`, in order.
    signed_ttls: Arc<RwLock<Vec<Duration>>>,
    /// If set, the next upload will fail with this error.
    next_error: Arc<RwLock<Option<StorageError>>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next upload fail without storing anything.
    pub async fn set_next_error(&self, error: StorageError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(path).map(|o| o.data.clone())
    }

    pub async fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|o| o.content_type.clone())
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Stored paths, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn signed_ttls(&self) -> Vec<Duration> {
        self.signed_ttls.read().await.clone()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn put_stream(
        &self,
        path: &str,
        content_type: &str,
        mut body: UploadBody,
    ) -> Result<u64, StorageError> {
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            data.extend_from_slice(&chunk);
        }

        let size = data.len() as u64;
        self.objects.write().await.insert(
            path.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                data,
            },
        );
        Ok(size)
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        self.signed_ttls.write().await.push(ttl);
        Ok(format!(
            "https://mock-storage.local/{}?ttl={}",
            path,
            ttl.as_secs()
        ))
    }
}
