use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::admission::RateLimitConfig;
use crate::fetcher::FetcherConfig;
use crate::job::JobsConfig;
use crate::queue::{DispatcherConfig, QueueConfig};
use crate::source::SourceConfig;
use crate::storage::StorageConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    3000
}

/// Database configuration (audit log and rate-limit state)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("photozip.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub fetcher: FetcherConfig,
    pub storage: SanitizedStorageConfig,
    pub queue: SanitizedQueueConfig,
    pub dispatcher: DispatcherConfig,
    pub jobs: JobsConfig,
    pub rate_limit: RateLimitConfig,
}

/// Storage config with the signing secret hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub backend: String,
    pub root: PathBuf,
    pub prefix: String,
    pub public_base_url: String,
    pub signing_secret_configured: bool,
    pub url_ttl_secs: u64,
}

/// Queue config with the access token hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedQueueConfig {
    pub backend: String,
    pub topic: String,
    pub subscription: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubsub: Option<SanitizedPubSubConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedPubSubConfig {
    pub project_id: String,
    pub api_base: String,
    pub access_token_configured: bool,
    pub max_messages: u32,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            source: config.source.clone(),
            fetcher: config.fetcher.clone(),
            storage: SanitizedStorageConfig {
                backend: config.storage.backend.as_str().to_string(),
                root: config.storage.root.clone(),
                prefix: config.storage.prefix.clone(),
                public_base_url: config.storage.public_base_url.clone(),
                signing_secret_configured: !config.storage.signing_secret.is_empty(),
                url_ttl_secs: config.storage.url_ttl_secs,
            },
            queue: SanitizedQueueConfig {
                backend: config.queue.backend.as_str().to_string(),
                topic: config.queue.topic.clone(),
                subscription: config.queue.subscription.clone(),
                pubsub: config.queue.pubsub.as_ref().map(|p| SanitizedPubSubConfig {
                    project_id: p.project_id.clone(),
                    api_base: p.api_base.clone(),
                    access_token_configured: p
                        .access_token
                        .as_deref()
                        .is_some_and(|t| !t.is_empty()),
                    max_messages: p.max_messages,
                    timeout_secs: p.timeout_secs,
                }),
            },
            dispatcher: config.dispatcher.clone(),
            jobs: config.jobs.clone(),
            rate_limit: config.rate_limit.clone(),
        }
    }
}
