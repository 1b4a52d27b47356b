use serde::{Deserialize, Serialize};

use super::RateLimitConfig;

/// Persisted bucket state for one client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Available tokens, `0 <= tokens <= capacity`.
    pub tokens: f64,
    /// Unix time of the last refill, in milliseconds.
    pub last_refill_ms: i64,
}

/// Result of evaluating one request against a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketDecision {
    pub allowed: bool,
    /// Whole requests still affordable after this one.
    pub remaining: u32,
    /// Seconds until the next request would be admitted. Only set on rejection.
    pub reset_in_secs: Option<u64>,
}

/// Token bucket parameters.
///
/// Pure arithmetic: state is passed in and returned, never held, so the
/// same bucket can be evaluated against any persistence backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    cost: f64,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64, cost: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            cost,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.bucket_size,
            config.tokens_per_second,
            config.cost_per_request,
        )
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Requests a full bucket admits in one burst, `floor(capacity / cost)`.
    pub fn limit(&self) -> u32 {
        (self.capacity / self.cost).floor() as u32
    }

    /// Refill `state` up to `now_ms`, then try to spend one request's cost.
    ///
    /// A missing state is a fresh, full bucket. Time running backwards
    /// refills nothing and does not move `last_refill_ms` back.
    pub fn evaluate(&self, state: Option<BucketState>, now_ms: i64) -> (BucketState, BucketDecision) {
        let state = state.unwrap_or(BucketState {
            tokens: self.capacity,
            last_refill_ms: now_ms,
        });

        let elapsed_secs = (now_ms - state.last_refill_ms).max(0) as f64 / 1000.0;
        let mut tokens = (state.tokens + elapsed_secs * self.refill_rate).min(self.capacity);

        let allowed = tokens >= self.cost;
        if allowed {
            tokens -= self.cost;
        }
        let tokens = tokens.max(0.0);

        let reset_in_secs = if allowed {
            None
        } else {
            Some(((self.cost - tokens) / self.refill_rate).ceil() as u64)
        };

        let next = BucketState {
            tokens,
            last_refill_ms: now_ms.max(state.last_refill_ms),
        };
        let decision = BucketDecision {
            allowed,
            remaining: (tokens / self.cost).floor() as u32,
            reset_in_secs,
        };
        (next, decision)
    }
}
