//! Namespaced persistent key-value store backed by SQLite.
//!
//! Every namespace is an independent `key -> bytes` map. Writes are
//! `INSERT OR REPLACE`, so racing writers of identical content are harmless
//! and the last write wins.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Namespace holding cached engine images.
pub const BINARY_NAMESPACE: &str = "/wasm";
/// Namespace holding the warm-start marker.
pub const WORKER_NAMESPACE: &str = "/worker";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

impl Store {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| StoreError::Io {
                path: parent.display().to_string(),
                reason: err.to_string(),
            })?;
        }
        let conn = Connection::open(path)?;
        // Several processes may bootstrap against the same file.
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self::from_connection(conn, Some(path.to_path_buf()))?;
        tracing::debug!("opened store at {}", path.display());
        Ok(store)
    }

    /// Private in-process database, gone when the last clone drops.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn namespace(&self, name: impl Into<String>) -> Namespace {
        Namespace {
            store: self.clone(),
            name: name.into(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// A view of one namespace. Cheap to clone and `Send`.
#[derive(Clone, Debug)]
pub struct Namespace {
    store: Store,
    name: String,
}

impl Namespace {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.store.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM entries WHERE namespace = ?1 AND key = ?2",
                params![self.name, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.store.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO entries (namespace, key, value, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.name, key, value, now_millis()],
        )?;
        Ok(())
    }

    /// Write many entries in one transaction.
    pub fn put_many<'a, I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO entries (namespace, key, value, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let now = now_millis();
            for (key, value) in entries {
                stmt.execute(params![self.name, key, value, now])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Swap the whole namespace for `entries` in one transaction.
    pub fn replace_all<'a, I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE namespace = ?1", params![self.name])?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries (namespace, key, value, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let now = now_millis();
            for (key, value) in entries {
                stmt.execute(params![self.name, key, value, now])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.store.lock()?;
        let removed = conn.execute(
            "DELETE FROM entries WHERE namespace = ?1 AND key = ?2",
            params![self.name, key],
        )?;
        Ok(removed > 0)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        let conn = self.store.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM entries WHERE namespace = ?1 AND key = ?2",
                params![self.name, key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Stored size in bytes, without loading the value.
    pub fn size_of(&self, key: &str) -> Result<Option<u64>> {
        let conn = self.store.lock()?;
        let size = conn
            .query_row(
                "SELECT length(value) FROM entries WHERE namespace = ?1 AND key = ?2",
                params![self.name, key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(size.map(|size| size as u64))
    }

    /// All entries ordered by key.
    pub fn entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.store.lock()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM entries WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![self.name], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.store.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE namespace = ?1",
            params![self.name],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every entry in the namespace, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.store.lock()?;
        let removed = conn.execute("DELETE FROM entries WHERE namespace = ?1", params![self.name])?;
        Ok(removed)
    }

    /// Boolean markers are stored as a single byte.
    pub fn get_flag(&self, key: &str) -> Result<bool> {
        Ok(matches!(self.get(key)?.as_deref(), Some([1])))
    }

    pub fn put_flag(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, &[value as u8])
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
