//! SQLite storage backend.
//!
//! Durable counterpart of [`MemoryBackend`](crate::memory::MemoryBackend):
//! one file, one table, whole-value overwrites.
//!
//! Features:
//! - WAL mode for concurrent readers
//! - Pooled connections, so the backend is `Send + Sync`
//! - Synchronous API matching [`StorageBackend`]

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::rusqlite::{params, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::error::Result;
use crate::store::StorageBackend;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_store (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
"#;

/// SQLite implementation of [`StorageBackend`].
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteBackend {
    /// Open or create a SQLite backend at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening SQLite backend at {:?}", path);

        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.busy_timeout(Duration::from_secs(5))?;
            c.pragma_update(None, "journal_mode", "WAL")?;
            c.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)?;

        let backend = Self { pool };
        backend.init_schema()?;
        Ok(backend)
    }

    /// Create an in-memory SQLite backend (for testing).
    ///
    /// Each SQLite in-memory connection is a separate database, so the pool
    /// holds exactly one connection and never recycles it.
    pub fn in_memory() -> Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())?;

        let backend = Self { pool };
        backend.init_schema()?;
        Ok(backend)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        debug!("SQLite schema initialized");
        Ok(())
    }

    /// Number of stored keys.
    pub fn len(&self) -> Result<usize> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Check if the backend holds no keys.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Get current Unix timestamp.
    fn now_unix() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl StorageBackend for SqliteBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let now = Self::now_unix();
        self.conn()?.execute(
            r#"
            INSERT INTO kv_store (key, value, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, now],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyedStore;
    use std::sync::Arc;

    #[test]
    fn test_set_and_get() {
        let backend = SqliteBackend::in_memory().unwrap();

        backend.set_item("a", "1").unwrap();
        assert_eq!(backend.get_item("a").unwrap().as_deref(), Some("1"));
        assert!(backend.get_item("missing").unwrap().is_none());
    }

    #[test]
    fn test_overwrite() {
        let backend = SqliteBackend::in_memory().unwrap();

        backend.set_item("a", "1").unwrap();
        backend.set_item("a", "2").unwrap();
        assert_eq!(backend.get_item("a").unwrap().as_deref(), Some("2"));
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.db");

        {
            let store = KeyedStore::new(Arc::new(SqliteBackend::open(&path).unwrap()));
            store.write("sidebar:user_1", &vec!["modules", "grades"]);
        }

        let store = KeyedStore::new(Arc::new(SqliteBackend::open(&path).unwrap()));
        let tabs: Vec<String> = store.read("sidebar:user_1", Vec::new());
        assert_eq!(tabs, vec!["modules".to_string(), "grades".to_string()]);
    }

    #[test]
    fn test_corrupt_row_reads_default() {
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        backend.set_item("k", "][").unwrap();

        let store = KeyedStore::new(backend);
        assert_eq!(store.read("k", 0u8), 0);
    }
}
