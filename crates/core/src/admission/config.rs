use serde::{Deserialize, Serialize};

/// Where bucket state is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
    #[default]
    Sqlite,
    /// Process-local, lost on restart. Tests and single-instance setups.
    Memory,
}

/// Token bucket parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub backend: RateLimitBackend,

    /// Bucket capacity in tokens.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: f64,

    /// Refill rate.
    #[serde(default = "default_tokens_per_second")]
    pub tokens_per_second: f64,

    /// Tokens consumed by one admitted request.
    #[serde(default = "default_cost_per_request")]
    pub cost_per_request: f64,

    /// Inactivity period after which a client's bucket is forgotten.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often expired buckets are purged from the store.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_bucket_size() -> f64 {
    15.0
}

fn default_tokens_per_second() -> f64 {
    1.0
}

fn default_cost_per_request() -> f64 {
    3.0
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_purge_interval_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::default(),
            bucket_size: default_bucket_size(),
            tokens_per_second: default_tokens_per_second(),
            cost_per_request: default_cost_per_request(),
            ttl_secs: default_ttl_secs(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}
