//! SQLite-backed [`KvStore`] for single-host deployments.
//!
//! Three tables model the key-value surface:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS kv      (key TEXT PRIMARY KEY, value TEXT NOT NULL);
//! CREATE TABLE IF NOT EXISTS kv_hash (key TEXT NOT NULL, field TEXT NOT NULL,
//!                                     value TEXT NOT NULL, PRIMARY KEY (key, field));
//! CREATE TABLE IF NOT EXISTS kv_list (key TEXT NOT NULL, seq INTEGER NOT NULL,
//!                                     value TEXT NOT NULL, PRIMARY KEY (key, seq));
//! ```
//!
//! WAL mode keeps concurrent session reads cheap. List order is an explicit
//! sequence column, not insertion luck.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::info;

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::store::KvStore;
use crate::WorldError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS kv_hash (
        key   TEXT NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (key, field)
    );
    CREATE TABLE IF NOT EXISTS kv_list (
        key   TEXT NOT NULL,
        seq   INTEGER NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (key, seq)
    );
";

/// Handle to an open SQLite database implementing [`KvStore`].
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKvStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteKvStore {
    /// Open (or create) a database at `path`, creating the schema if needed.
    ///
    /// # Errors
    /// Returns [`WorldError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};",
            config.busy_timeout_ms
        ))?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = config.wal_mode, "sqlite kv store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    /// Returns [`WorldError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }
}

fn storage_err(err: rusqlite::Error) -> WorldError {
    WorldError::StorageUnavailable(err.to_string())
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(storage_err)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM kv_hash WHERE key = ?1 AND field = ?2",
            params![key, field],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err)
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            params![key, field, value],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn list_append(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_list (key, seq, value)
             VALUES (?1, COALESCE((SELECT MAX(seq) + 1 FROM kv_list WHERE key = ?1), 0), ?2)",
            params![key, value],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn list_all(&self, key: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT value FROM kv_list WHERE key = ?1 ORDER BY seq")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(storage_err)?);
        }
        Ok(out)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM kv WHERE key = ?1)
                      + (SELECT COUNT(*) FROM kv_hash WHERE key = ?1)
                      + (SELECT COUNT(*) FROM kv_list WHERE key = ?1)",
                params![key],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count > 0)
    }
}
