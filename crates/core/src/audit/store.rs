use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Selects audit records. Empty criteria match everything; newest first.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    /// Raw tag string of the job
    pub job_key: Option<String>,
    /// Any of these event types; empty means all
    pub event_types: Vec<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            job_key: None,
            event_types: Vec::new(),
            from: None,
            to: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_key(mut self, job_key: impl Into<String>) -> Self {
        self.job_key = Some(job_key.into());
        self
    }

    /// Adds to the accepted event types.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn with_time_range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Same criteria, different page.
    pub fn page(&self, limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            ..self.clone()
        }
    }
}

/// Append-only sink for audit records.
pub trait AuditStore: Send + Sync {
    /// Insert a record, returning the assigned id
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Insert several records. Stores that can should make this atomic.
    fn insert_batch(&self, records: &[AuditRecord]) -> Result<usize, AuditError> {
        for record in records {
            self.insert(record)?;
        }
        Ok(records.len())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Matching records, ignoring `limit` and `offset`.
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}
