//! Persistent store
//!
//! An embedded, transactional, key-ordered store built on libSQL. All data
//! lives in a single `kv` table addressed by `(bucket, key)`:
//!
//! - `hooks` - hook identities and their ordered component lists
//! - `stats` - hourly and lifetime delivery counters
//! - `<component-type>` - scalar configuration, keyed `"{hook}-{field}"`
//! - `<component-type>/<set>` - nested sets (dedup tokens, rate windows),
//!   keyed `"{hook}/{member}"`
//!
//! Every read-modify-write goes through a [`StoreTx`]. Write transactions
//! are opened `IMMEDIATE` so concurrent writers serialize on the database
//! lock instead of losing updates; read transactions are `DEFERRED` and see
//! a consistent snapshot without blocking writers (WAL mode).

mod partition;

pub use partition::{NestedSet, Partition};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use libsql::{Connection, Database, Transaction, TransactionBehavior};
use thiserror::Error;
use tracing::debug;

/// Bucket holding hook identities.
pub const HOOKS_BUCKET: &str = "hooks";

/// Bucket holding delivery counters.
pub const STATS_BUCKET: &str = "stats";

/// Default time a writer waits for the database lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "\
    CREATE TABLE IF NOT EXISTS kv (\
        bucket TEXT NOT NULL, \
        key TEXT NOT NULL, \
        value BLOB NOT NULL, \
        PRIMARY KEY (bucket, key)\
    ) WITHOUT ROWID;";

/// Errors raised by the persistent store.
///
/// These are infrastructure faults, distinct from a component rejecting a
/// delivery.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt value at {bucket}/{key}: {message}")]
    Corrupt {
        bucket: String,
        key: String,
        message: String,
    },
}

impl From<libsql::Error> for StorageError {
    fn from(err: libsql::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Transaction locking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Snapshot read; upgrades to a write lock only on first write.
    Read,
    /// Takes the write lock up front.
    Write,
}

/// Handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    busy_timeout: Duration,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Open the database with an explicit lock wait timeout.
    pub async fn open_with_busy_timeout(
        path: &Path,
        busy_timeout: Duration,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = libsql::Builder::new_local(path).build().await?;
        let store = Self {
            db: Arc::new(db),
            busy_timeout,
        };

        let conn = store.connect().await?;
        // WAL persists in the file; readers stop blocking the writer.
        conn.query("PRAGMA journal_mode=WAL", ()).await?;
        conn.execute_batch(SCHEMA).await?;
        debug!(target: "store", path = %path.display(), "store opened");

        Ok(store)
    }

    async fn connect(&self) -> Result<Connection, StorageError> {
        let conn = self.db.connect()?;
        conn.query(
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis()),
            (),
        )
        .await?;
        Ok(conn)
    }

    /// Begin a transaction.
    pub async fn begin(&self, mode: TxMode) -> Result<StoreTx, StorageError> {
        let conn = self.connect().await?;
        let behavior = match mode {
            TxMode::Read => TransactionBehavior::Deferred,
            TxMode::Write => TransactionBehavior::Immediate,
        };
        let tx = conn.transaction_with_behavior(behavior).await?;
        Ok(StoreTx { tx, _conn: conn })
    }
}

/// An open transaction. Dropping it without [`StoreTx::commit`] discards
/// every write made through it.
pub struct StoreTx {
    tx: Transaction,
    _conn: Connection,
}

impl StoreTx {
    /// Scope this transaction to one component type and one hook.
    pub fn partition<'a>(&'a self, bucket: &'a str, hook_id: &'a str) -> Partition<'a> {
        Partition::new(self, bucket, hook_id)
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut rows = self
            .tx
            .query(
                "SELECT value FROM kv WHERE bucket = ?1 AND key = ?2",
                libsql::params![bucket, key],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<Vec<u8>>(0)?)),
            None => Ok(None),
        }
    }

    /// Read a value and decode it as UTF-8.
    pub async fn get_string(&self, bucket: &str, key: &str) -> Result<Option<String>, StorageError> {
        match self.get(bucket, key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let mut rows = self
            .tx
            .query(
                "SELECT 1 FROM kv WHERE bucket = ?1 AND key = ?2",
                libsql::params![bucket, key],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Insert or overwrite a value.
    pub async fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.tx
            .execute(
                "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
                libsql::params![bucket, key, libsql::Value::Blob(value.to_vec())],
            )
            .await?;
        Ok(())
    }

    /// Delete a key. Returns whether it existed.
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let affected = self
            .tx
            .execute(
                "DELETE FROM kv WHERE bucket = ?1 AND key = ?2",
                libsql::params![bucket, key],
            )
            .await?;
        Ok(affected > 0)
    }

    /// All `(key, value)` pairs in `bucket` whose key starts with `prefix`,
    /// in key order.
    pub async fn scan_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let upper = prefix_upper_bound(prefix);
        let mut rows = self
            .tx
            .query(
                "SELECT key, value FROM kv WHERE bucket = ?1 AND key >= ?2 AND key < ?3 \
                 ORDER BY key",
                libsql::params![bucket, prefix, upper.as_str()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push((row.get::<String>(0)?, row.get::<Vec<u8>>(1)?));
        }
        Ok(entries)
    }

    /// Count keys in the inclusive range `[low, high]`.
    pub async fn count_between(
        &self,
        bucket: &str,
        low: &str,
        high: &str,
    ) -> Result<u64, StorageError> {
        let mut rows = self
            .tx
            .query(
                "SELECT COUNT(*) FROM kv WHERE bucket = ?1 AND key >= ?2 AND key <= ?3",
                libsql::params![bucket, low, high],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// Delete keys in the half-open range `[low, high)`. Returns the number
    /// of deleted entries.
    pub async fn delete_range(
        &self,
        bucket: &str,
        low: &str,
        high: &str,
    ) -> Result<u64, StorageError> {
        let affected = self
            .tx
            .execute(
                "DELETE FROM kv WHERE bucket = ?1 AND key >= ?2 AND key < ?3",
                libsql::params![bucket, low, high],
            )
            .await?;
        Ok(affected)
    }

    /// Read an integer counter (missing = 0).
    pub async fn get_counter(&self, bucket: &str, key: &str) -> Result<u64, StorageError> {
        match self.get_string(bucket, key).await? {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| StorageError::Corrupt {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            }),
            None => Ok(0),
        }
    }

    /// Increment an integer counter and return its new value.
    pub async fn increment(&self, bucket: &str, key: &str) -> Result<u64, StorageError> {
        let next = self.get_counter(bucket, key).await? + 1;
        self.put(bucket, key, next.to_string().as_bytes()).await?;
        debug!(target: "store", bucket, key, count = next, "incremented counter");
        Ok(next)
    }

    pub async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> String {
    let mut upper = String::with_capacity(prefix.len() + 4);
    upper.push_str(prefix);
    upper.push(char::MAX);
    upper
}
