//! Keyed store file with one partition per run
//!
//! Every operation opens its own connection and commits before returning, so
//! a crash never loses an acknowledged write. Different runs may share a
//! file concurrently; SQLite's file locking serializes their writers.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::common::{Error, Result};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A run partition as listed by [`KeyedStore::partitions`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Partition {
    pub run_id: String,
    /// Process that holds the partition open, if any
    pub owner_pid: Option<u32>,
}

/// One store file, e.g. `artifact.db` or `instance.db`
#[derive(Debug, Clone)]
pub(crate) struct KeyedStore {
    db_path: PathBuf,
}

impl KeyedStore {
    pub(crate) fn new(root: &Path, file_name: &str) -> Self {
        Self {
            db_path: root.join(file_name),
        }
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS partitions (
                run_id TEXT PRIMARY KEY,
                created_at_ms INTEGER NOT NULL,
                owner_pid INTEGER
            );
            CREATE TABLE IF NOT EXISTS entries (
                run_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY (run_id, key)
            );
            ",
        )?;
        Ok(conn)
    }

    fn has_partition(conn: &Connection, run_id: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM partitions WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn require_partition(conn: &Connection, run_id: &str) -> Result<()> {
        if Self::has_partition(conn, run_id)? {
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "run partition '{run_id}' does not exist"
            )))
        }
    }

    /// Create an empty partition for a run, optionally owned by a process
    pub(crate) fn create_partition(&self, run_id: &str, owner_pid: Option<u32>) -> Result<()> {
        let conn = self.open_connection()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO partitions (run_id, created_at_ms, owner_pid)
             VALUES (?1, ?2, ?3)",
            params![run_id, now_ms(), owner_pid],
        )?;
        if inserted == 0 {
            return Err(Error::Storage(format!(
                "run partition '{run_id}' already exists"
            )));
        }
        Ok(())
    }

    /// Clear the owner of a partition
    pub(crate) fn release_partition(&self, run_id: &str) -> Result<()> {
        let conn = self.open_connection()?;
        conn.execute(
            "UPDATE partitions SET owner_pid = NULL WHERE run_id = ?1",
            params![run_id],
        )?;
        Ok(())
    }

    /// Check that a run partition exists
    pub(crate) fn ensure_partition(&self, run_id: &str) -> Result<()> {
        let conn = self.open_connection()?;
        Self::require_partition(&conn, run_id)
    }

    /// Store a value, replacing any previous value for the key
    pub(crate) fn put(&self, run_id: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.open_connection()?;
        let tx = conn.transaction()?;
        Self::require_partition(&tx, run_id)?;
        tx.execute(
            "INSERT OR REPLACE INTO entries (run_id, key, value, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, key, value, now_ms()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Add a key once; later adds of the same key keep the original entry
    pub(crate) fn insert(&self, run_id: &str, key: &str) -> Result<()> {
        let mut conn = self.open_connection()?;
        let tx = conn.transaction()?;
        Self::require_partition(&tx, run_id)?;
        tx.execute(
            "INSERT OR IGNORE INTO entries (run_id, key, value, created_at_ms)
             VALUES (?1, ?2, x'', ?3)",
            params![run_id, key, now_ms()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn get(&self, run_id: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.open_connection()?;
        Self::require_partition(&conn, run_id)?;
        let value = conn
            .query_row(
                "SELECT value FROM entries WHERE run_id = ?1 AND key = ?2",
                params![run_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// All keys of a run in insertion order
    pub(crate) fn keys(&self, run_id: &str) -> Result<Vec<String>> {
        let conn = self.open_connection()?;
        Self::require_partition(&conn, run_id)?;
        let mut stmt =
            conn.prepare("SELECT key FROM entries WHERE run_id = ?1 ORDER BY rowid ASC")?;
        let keys = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    /// Delete a run partition together with all of its entries
    pub(crate) fn drop_partition(&self, run_id: &str) -> Result<()> {
        let mut conn = self.open_connection()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM partitions WHERE run_id = ?1", params![run_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Partitions in this file, oldest first
    pub(crate) fn partitions(&self) -> Result<Vec<Partition>> {
        if !self.db_path.exists() {
            return Ok(Vec::new());
        }
        let conn = self.open_connection()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, owner_pid FROM partitions ORDER BY created_at_ms, run_id",
        )?;
        let runs = stmt
            .query_map([], |row| {
                Ok(Partition {
                    run_id: row.get(0)?,
                    owner_pid: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}
