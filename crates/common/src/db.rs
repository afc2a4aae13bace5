//! SQLite-backed record store

use crate::store::{RecordStore, StoredRecord};
use crate::{types::now, Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// SQLite record store
///
/// Every statement runs under the connection mutex, which is what makes
/// `increment` and `delete_older_than` atomic with respect to readers.
/// Clones share that one connection, so statements from all threads are
/// serialized whatever keys they touch. WAL mode only helps readers in
/// other processes opening the same file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened record store at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                touched_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            CREATE INDEX IF NOT EXISTS idx_records_touched ON records(namespace, touched_at);
            "#,
        )?;

        debug!("Record store schema initialized");
        Ok(())
    }
}

/// Raw database row before parsing
struct RawRow {
    key: String,
    value: String,
    touched_at: i64,
    updated_at: i64,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawRow {
            key: row.get(0)?,
            value: row.get(1)?,
            touched_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn parse(self) -> Result<StoredRecord> {
        Ok(StoredRecord {
            key: self.key,
            value: serde_json::from_str(&self.value)?,
            touched_at: self.touched_at,
            updated_at: self.updated_at,
        })
    }
}

impl RecordStore for SqliteStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT key, value, touched_at, updated_at FROM records
                 WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                RawRow::from_row,
            )
            .optional()?;

        row.map(RawRow::parse).transpose()
    }

    fn put(&self, namespace: &str, key: &str, value: &Value, touched_at: i64) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO records (namespace, key, value, touched_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                touched_at = excluded.touched_at,
                updated_at = excluded.updated_at",
            params![namespace, key, serde_json::to_string(value)?, touched_at, now()],
        )?;

        debug!("Stored {}/{}", namespace, key);
        Ok(())
    }

    fn increment(&self, namespace: &str, key: &str, field: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let path = format!("$.{}", field);

        let rows = conn.execute(
            "UPDATE records
             SET value = json_set(value, ?3, COALESCE(json_extract(value, ?3), 0) + 1),
                 updated_at = ?4
             WHERE namespace = ?1 AND key = ?2",
            params![namespace, key, path, now()],
        )?;

        if rows == 0 {
            return Err(Error::not_found(namespace, key));
        }

        let value: i64 = conn.query_row(
            "SELECT json_extract(value, ?3) FROM records WHERE namespace = ?1 AND key = ?2",
            params![namespace, key, path],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    fn delete_older_than(&self, namespace: &str, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM records WHERE namespace = ?1 AND touched_at < ?2",
            params![namespace, cutoff],
        )?;

        if rows > 0 {
            debug!("Deleted {} record(s) from {} older than {}", rows, namespace, cutoff);
        }
        Ok(rows)
    }

    fn list(&self, namespace: &str) -> Result<Vec<StoredRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT key, value, touched_at, updated_at FROM records
             WHERE namespace = ?1 ORDER BY touched_at DESC, key ASC",
        )?;
        let rows = stmt.query_map(params![namespace], RawRow::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;
    use serde_json::json;

    #[test]
    fn test_crud() {
        conformance::crud(&SqliteStore::open_memory().unwrap());
    }

    #[test]
    fn test_increment() {
        conformance::increment(&SqliteStore::open_memory().unwrap());
    }

    #[test]
    fn test_retention() {
        conformance::retention(&SqliteStore::open_memory().unwrap());
    }

    #[test]
    fn test_concurrent_increments() {
        conformance::concurrent_increments(Arc::new(SqliteStore::open_memory().unwrap()));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("ns", "k", &json!({"v": "kept"}), 42).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let record = store.get("ns", "k").unwrap().unwrap();
        assert_eq!(record.value["v"], "kept");
        assert_eq!(record.touched_at, 42);
    }

    #[test]
    fn test_corrupt_value_is_serialization_error() {
        let store = SqliteStore::open_memory().unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO records (namespace, key, value, touched_at, updated_at)
                 VALUES ('ns', 'bad', 'not json', 0, 0)",
                [],
            )
            .unwrap();
        }
        assert!(matches!(store.get("ns", "bad"), Err(Error::Serialization(_))));
    }
}
