use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[serde(rename = "pubsub")]
    PubSub,
    /// In-process queue. Requests are lost on restart.
    #[default]
    Memory,
}

impl QueueBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PubSub => "pubsub",
            Self::Memory => "memory",
        }
    }
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_subscription")]
    pub subscription: String,
    /// Required when `backend = "pubsub"`.
    #[serde(default)]
    pub pubsub: Option<PubSubConfig>,
}

fn default_topic() -> String {
    "dmii-1".to_string()
}

fn default_subscription() -> String {
    "dmii-1".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            topic: default_topic(),
            subscription: default_subscription(),
            pubsub: None,
        }
    }
}

/// Google Cloud Pub/Sub REST settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    pub project_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// OAuth bearer token. Omit when talking to the emulator.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Upper bound on messages per pull.
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://pubsub.googleapis.com".to_string()
}

fn default_max_messages() -> u32 {
    10
}

fn default_timeout() -> u64 {
    60
}

/// Message dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// When disabled, requests are published but never processed here.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Jobs running at once. Messages are not pulled while all slots are busy.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Pause after a failed pull (milliseconds).
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,

    /// Minimum spacing between empty pulls (milliseconds).
    #[serde(default = "default_idle_poll")]
    pub idle_poll_ms: u64,

    /// Ack deadline kept on messages whose job is still running
    /// (milliseconds). Renewed every half interval; 0 disables renewal.
    #[serde(default = "default_ack_extension")]
    pub ack_extension_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_error_backoff() -> u64 {
    1000
}

fn default_idle_poll() -> u64 {
    500
}

fn default_ack_extension() -> u64 {
    60_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            error_backoff_ms: default_error_backoff(),
            idle_poll_ms: default_idle_poll(),
            ack_extension_ms: default_ack_extension(),
        }
    }
}
