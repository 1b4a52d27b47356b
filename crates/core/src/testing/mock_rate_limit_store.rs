//! Mock rate limit store for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::admission::{
    BucketState, BucketUpdate, MemoryRateLimitStore, RateLimitStore, RateLimitStoreError,
};

/// In-memory store that can be switched to unavailable.
#[derive(Default)]
pub struct MockRateLimitStore {
    inner: MemoryRateLimitStore,
    unavailable: AtomicBool,
    updates: AtomicUsize,
}

impl MockRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of update attempts, failed ones included.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), RateLimitStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RateLimitStoreError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

impl RateLimitStore for MockRateLimitStore {
    fn name(&self) -> &str {
        "mock"
    }

    fn update(
        &self,
        key: &str,
        now_ms: i64,
        ttl: Duration,
        update: BucketUpdate<'_>,
    ) -> Result<BucketState, RateLimitStoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner.update(key, now_ms, ttl, update)
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize, RateLimitStoreError> {
        self.check_available()?;
        self.inner.purge_expired(now_ms)
    }
}
