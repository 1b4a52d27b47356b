use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use super::BucketState;

#[derive(Debug, Error)]
pub enum RateLimitStoreError {
    #[error("Rate limit store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Closure applied to the current bucket state inside [`RateLimitStore::update`].
pub type BucketUpdate<'a> = &'a mut dyn FnMut(Option<BucketState>) -> BucketState;

/// Persistence for per-client bucket state.
pub trait RateLimitStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Atomically read the state for `key`, apply `update`, and write the
    /// result back with its expiry pushed to `now_ms + ttl`.
    ///
    /// Expired entries are passed to `update` as absent.
    fn update(
        &self,
        key: &str,
        now_ms: i64,
        ttl: Duration,
        update: BucketUpdate<'_>,
    ) -> Result<BucketState, RateLimitStoreError>;

    /// Drop entries whose expiry is at or before `now_ms`.
    fn purge_expired(&self, now_ms: i64) -> Result<usize, RateLimitStoreError>;
}

/// `now_ms + ttl`, saturating instead of overflowing.
pub(crate) fn expiry_ms(now_ms: i64, ttl: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

struct MemoryEntry {
    state: BucketState,
    expires_at_ms: i64,
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn update(
        &self,
        key: &str,
        now_ms: i64,
        ttl: Duration,
        update: BucketUpdate<'_>,
    ) -> Result<BucketState, RateLimitStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| RateLimitStoreError::Unavailable("store lock poisoned".to_string()))?;

        let current = entries
            .get(key)
            .filter(|entry| entry.expires_at_ms > now_ms)
            .map(|entry| entry.state);
        let next = update(current);

        entries.insert(
            key.to_string(),
            MemoryEntry {
                state: next,
                expires_at_ms: expiry_ms(now_ms, ttl),
            },
        );
        Ok(next)
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize, RateLimitStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| RateLimitStoreError::Unavailable("store lock poisoned".to_string()))?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at_ms > now_ms);
        Ok(before - entries.len())
    }
}
