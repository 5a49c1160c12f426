//! SQLite-backed key-value store
//!
//! One `kv` table; the quota is enforced with the same character accounting
//! as the in-memory backend (`LENGTH` on TEXT counts characters).

use super::{char_len, KeyValueStore, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Thread-safe store handle
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    capacity_chars: usize,
}

impl SqliteStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P, capacity_chars: usize) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, capacity_chars)
    }

    /// Open an in-memory store (for testing)
    #[cfg(test)]
    pub fn open_in_memory(capacity_chars: usize) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, capacity_chars)
    }

    fn init(conn: Connection, capacity_chars: usize) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            capacity_chars,
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".into()))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0) FROM kv WHERE key != ?1",
            params![key],
            |row| row.get(0),
        )?;
        let used = usize::try_from(used).unwrap_or(usize::MAX);
        let needed = char_len(key) + char_len(value);
        let available = self.capacity_chars.saturating_sub(used);
        if needed > available {
            return Err(StoreError::QuotaExceeded { needed, available });
        }

        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}
