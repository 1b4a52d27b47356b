use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::{AuditError, AuditFilter, AuditRecord, AuditStore};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        job_key TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_job_key ON audit_events(job_key);
    CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
"#;

const INSERT: &str =
    "INSERT INTO audit_events (timestamp, event_type, job_key, data) VALUES (?1, ?2, ?3, ?4)";

/// SQLite-backed audit store. Shares the database file with the rate
/// limiter, each in its own table.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("connection lock poisoned".to_string()))
    }

    fn insert_with(conn: &Connection, record: &AuditRecord) -> Result<i64, AuditError> {
        let data = serde_json::to_string(&record.data)?;
        conn.prepare_cached(INSERT)?.execute(params![
            record.timestamp.to_rfc3339(),
            record.event_type,
            record.job_key,
            data,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, Option<String>, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }
}

/// `WHERE` clause and its positional values for `filter`.
fn where_clause(filter: &AuditFilter) -> (String, Vec<Value>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut values = Vec::new();

    if let Some(job_key) = &filter.job_key {
        conditions.push("job_key = ?".to_string());
        values.push(Value::Text(job_key.clone()));
    }
    if !filter.event_types.is_empty() {
        let slots = vec!["?"; filter.event_types.len()].join(", ");
        conditions.push(format!("event_type IN ({})", slots));
        values.extend(filter.event_types.iter().cloned().map(Value::Text));
    }
    if let Some(from) = filter.from {
        conditions.push("timestamp >= ?".to_string());
        values.push(Value::Text(from.to_rfc3339()));
    }
    if let Some(to) = filter.to {
        conditions.push("timestamp <= ?".to_string());
        values.push(Value::Text(to.to_rfc3339()));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), values)
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let conn = self.conn()?;
        Self::insert_with(&conn, record)
    }

    fn insert_batch(&self, records: &[AuditRecord]) -> Result<usize, AuditError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for record in records {
            Self::insert_with(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.conn()?;

        let (clause, mut values) = where_clause(filter);
        values.push(Value::Integer(filter.limit));
        values.push(Value::Integer(filter.offset));
        let sql = format!(
            "SELECT id, timestamp, event_type, job_key, data FROM audit_events {} \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), Self::read_row)?;

        let records: Result<Vec<AuditRecord>, AuditError> = rows
            .map(|row| {
                let (id, timestamp, event_type, job_key, data) = row?;
                let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| AuditError::Database(format!("Invalid timestamp: {}", e)))?
                    .into();
                Ok(AuditRecord {
                    id,
                    timestamp,
                    event_type,
                    job_key,
                    data: serde_json::from_str(&data)?,
                })
            })
            .collect();
        records
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.conn()?;
        let (clause, values) = where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", clause);
        Ok(conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?)
    }
}
