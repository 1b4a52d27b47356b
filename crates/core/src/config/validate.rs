use super::{types::Config, ConfigError};
use crate::queue::QueueBackend;

/// Longest lifetime of a signed archive link (7 days).
const MAX_URL_TTL_SECS: u64 = 7 * 24 * 3600;

/// Longest idle lifetime of a rate limit bucket (30 days).
const MAX_RATE_LIMIT_TTL_SECS: u64 = 30 * 24 * 3600;

/// Longest ack deadline a queue will accept (10 minutes).
const MAX_ACK_EXTENSION_MS: u64 = 600_000;

fn invalid(msg: &str) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(msg.to_string()))
}

/// Validate configuration values serde cannot check on its own.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    let rl = &config.rate_limit;
    if rl.bucket_size <= 0.0 {
        return invalid("rate_limit.bucket_size must be positive");
    }
    if rl.tokens_per_second <= 0.0 {
        return invalid("rate_limit.tokens_per_second must be positive");
    }
    if rl.cost_per_request <= 0.0 {
        return invalid("rate_limit.cost_per_request must be positive");
    }
    if rl.cost_per_request > rl.bucket_size {
        return invalid("rate_limit.cost_per_request cannot exceed rate_limit.bucket_size");
    }
    if rl.ttl_secs == 0 || rl.ttl_secs > MAX_RATE_LIMIT_TTL_SECS {
        return invalid("rate_limit.ttl_secs must be between 1 and 2592000");
    }

    if config.jobs.max_images == 0 {
        return invalid("jobs.max_images cannot be 0");
    }
    if config.dispatcher.max_concurrent_jobs == 0 {
        return invalid("dispatcher.max_concurrent_jobs cannot be 0");
    }
    if config.dispatcher.ack_extension_ms > MAX_ACK_EXTENSION_MS {
        return invalid("dispatcher.ack_extension_ms cannot exceed 600000");
    }

    if config.queue.backend == QueueBackend::PubSub {
        if config.queue.subscription.trim().is_empty() {
            return invalid("queue.subscription is required for the pubsub backend");
        }
        match config.queue.pubsub {
            Some(ref pubsub) if !pubsub.project_id.trim().is_empty() => {}
            _ => return invalid("queue.pubsub.project_id is required for the pubsub backend"),
        }
    }

    if config.storage.signing_secret.is_empty() {
        return invalid("storage.signing_secret cannot be empty");
    }
    if config.storage.url_ttl_secs == 0 || config.storage.url_ttl_secs > MAX_URL_TTL_SECS {
        return invalid("storage.url_ttl_secs must be between 1 and 604800");
    }

    Ok(())
}
