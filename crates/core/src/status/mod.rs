//! Latest outcome per job key.
//!
//! Volatile: the table lives as long as the process. Keys are the raw tag
//! strings from requests, so `"a,b"` and `"b,a"` are different jobs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Terminal result of the most recent job for a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success {
        url: String,
        photo_count: u32,
        timestamp: DateTime<Utc>,
    },
    Failed {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobOutcome {
    pub fn success(url: impl Into<String>, photo_count: u32) -> Self {
        Self::Success {
            url: url.into(),
            photo_count,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Success { timestamp, .. } | Self::Failed { timestamp, .. } => *timestamp,
        }
    }
}

/// Process-wide job outcome table. Last write wins.
#[derive(Debug, Default)]
pub struct JobStatusStore {
    outcomes: RwLock<HashMap<String, JobOutcome>>,
}

impl JobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was recorded for `key`.
    pub async fn record(&self, key: &str, outcome: JobOutcome) {
        self.outcomes.write().await.insert(key.to_string(), outcome);
    }

    pub async fn get(&self, key: &str) -> Option<JobOutcome> {
        self.outcomes.read().await.get(key).cloned()
    }

    /// Snapshot of every recorded outcome.
    pub async fn list_all(&self) -> HashMap<String, JobOutcome> {
        self.outcomes.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.outcomes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.outcomes.read().await.is_empty()
    }
}
