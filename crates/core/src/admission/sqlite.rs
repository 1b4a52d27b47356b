use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::store::expiry_ms;
use super::{BucketState, BucketUpdate, RateLimitStore, RateLimitStoreError};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS rate_limit_buckets (
        key TEXT PRIMARY KEY,
        tokens REAL NOT NULL,
        last_refill_ms INTEGER NOT NULL,
        expires_at_ms INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_rate_limit_buckets_expires ON rate_limit_buckets(expires_at_ms);
"#;

/// SQLite-backed bucket store.
///
/// Each update runs in an immediate transaction, so concurrent checks for the
/// same key (from this or another process sharing the file) serialize.
pub struct SqliteRateLimitStore {
    conn: Mutex<Connection>,
}

impl SqliteRateLimitStore {
    pub fn new(path: &Path) -> Result<Self, RateLimitStoreError> {
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(unavailable)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, RateLimitStoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, RateLimitStoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| RateLimitStoreError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RateLimitStoreError> {
        self.conn
            .lock()
            .map_err(|_| RateLimitStoreError::Unavailable("connection lock poisoned".to_string()))
    }
}

fn unavailable(e: rusqlite::Error) -> RateLimitStoreError {
    RateLimitStoreError::Unavailable(e.to_string())
}

fn database(e: rusqlite::Error) -> RateLimitStoreError {
    RateLimitStoreError::Database(e.to_string())
}

impl RateLimitStore for SqliteRateLimitStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn update(
        &self,
        key: &str,
        now_ms: i64,
        ttl: Duration,
        update: BucketUpdate<'_>,
    ) -> Result<BucketState, RateLimitStoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(unavailable)?;

        let current = tx
            .query_row(
                "SELECT tokens, last_refill_ms FROM rate_limit_buckets WHERE key = ? AND expires_at_ms > ?",
                params![key, now_ms],
                |row| {
                    Ok(BucketState {
                        tokens: row.get(0)?,
                        last_refill_ms: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(database)?;

        let next = update(current);
        let expires_at_ms = expiry_ms(now_ms, ttl);

        tx.execute(
            "INSERT INTO rate_limit_buckets (key, tokens, last_refill_ms, expires_at_ms) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                tokens = excluded.tokens,
                last_refill_ms = excluded.last_refill_ms,
                expires_at_ms = excluded.expires_at_ms",
            params![key, next.tokens, next.last_refill_ms, expires_at_ms],
        )
        .map_err(database)?;

        tx.commit().map_err(database)?;
        Ok(next)
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize, RateLimitStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM rate_limit_buckets WHERE expires_at_ms <= ?",
            params![now_ms],
        )
        .map_err(database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::TokenBucket;

    const TTL: Duration = Duration::from_secs(3600);

    fn check(store: &SqliteRateLimitStore, bucket: &TokenBucket, key: &str, now_ms: i64) -> bool {
        let mut allowed = false;
        store
            .update(key, now_ms, TTL, &mut |current| {
                let (next, decision) = bucket.evaluate(current, now_ms);
                allowed = decision.allowed;
                next
            })
            .unwrap();
        allowed
    }

    #[test]
    fn test_state_persists_between_updates() {
        let store = SqliteRateLimitStore::in_memory().unwrap();
        let bucket = TokenBucket::new(15.0, 1.0, 3.0);

        let admitted = (0..6).filter(|_| check(&store, &bucket, "ratelimit:1.2.3.4", 0)).count();
        assert_eq!(admitted, 5);

        // Other clients have their own bucket
        assert!(check(&store, &bucket, "ratelimit:5.6.7.8", 0));
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("ratelimit.db");
        let bucket = TokenBucket::new(6.0, 1.0, 3.0);

        {
            let store = SqliteRateLimitStore::new(&db_path).unwrap();
            assert!(check(&store, &bucket, "k", 0));
            assert!(check(&store, &bucket, "k", 0));
        }

        let store = SqliteRateLimitStore::new(&db_path).unwrap();
        assert!(!check(&store, &bucket, "k", 0));
    }

    #[test]
    fn test_expired_rows_are_ignored_and_purged() {
        let store = SqliteRateLimitStore::in_memory().unwrap();
        let ttl = Duration::from_secs(10);
        store
            .update("k", 0, ttl, &mut |_| BucketState {
                tokens: 0.0,
                last_refill_ms: 0,
            })
            .unwrap();

        let mut seen = Some(BucketState {
            tokens: 1.0,
            last_refill_ms: 0,
        });
        store
            .update("k", 10_000, ttl, &mut |current| {
                seen = current;
                BucketState {
                    tokens: 15.0,
                    last_refill_ms: 10_000,
                }
            })
            .unwrap();
        assert!(seen.is_none());

        assert_eq!(store.purge_expired(19_999).unwrap(), 0);
        assert_eq!(store.purge_expired(20_000).unwrap(), 1);
    }
}
