use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Intake
    ZipRequestPublished {
        tags: String,
        message_id: String,
    },
    /// A delivery could not be decoded and was acknowledged without processing.
    MessageDropped {
        message_id: String,
        reason: String,
    },

    // Job lifecycle
    JobStarted {
        tags: String,
        message_id: Option<String>,
    },
    ArchivePublished {
        filename: String,
        storage_path: String,
        public_url: String,
        created_at: DateTime<Utc>,
        size_bytes: u64,
    },
    JobCompleted {
        tags: String,
        url: String,
        photo_count: u32,
        /// Entries that made it into the archive
        embedded: u32,
        /// Entries skipped because their download failed
        skipped: u32,
        duration_ms: u64,
    },
    JobFailed {
        tags: String,
        reason: String,
        /// Whether the delivery was handed back for redelivery
        retryable: bool,
    },

    // Admission control
    AdmissionFailedOpen {
        client: String,
        reason: String,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::ZipRequestPublished { .. } => "zip_request_published",
            Self::MessageDropped { .. } => "message_dropped",
            Self::JobStarted { .. } => "job_started",
            Self::ArchivePublished { .. } => "archive_published",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::AdmissionFailedOpen { .. } => "admission_failed_open",
        }
    }

    /// The job key (raw tag string) this event relates to, if any.
    pub fn job_key(&self) -> Option<&str> {
        match self {
            Self::ZipRequestPublished { tags, .. }
            | Self::JobStarted { tags, .. }
            | Self::JobCompleted { tags, .. }
            | Self::JobFailed { tags, .. } => Some(tags),
            _ => None,
        }
    }
}

/// A persisted audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub job_key: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// An unsaved record; the store assigns `id`.
    pub fn new(timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            job_key: event.job_key().map(String::from),
            data: event,
        }
    }
}
