//! SQLite implementation of the KvStore trait.
//!
//! The durable backend. Uses rusqlite with bundled SQLite, wrapped in async
//! via `tokio::task::spawn_blocking`. Compare-and-swap runs inside an
//! immediate transaction, so it stays atomic even with several processes
//! sharing one database file.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{Entry, KvStore, PutResult};

/// SQLite-based store. Thread-safe via an internal Mutex.
#[derive(Clone)]
pub struct SqliteKv {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKv {
    /// Open a SQLite database at the given path, creating and migrating it
    /// if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry(ttl: Option<Duration>, now: i64) -> Option<i64> {
    ttl.map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}

fn to_version(raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| StoreError::Serialization(format!("negative version {raw}")))
}

/// Advance the shared clock and return the new version.
fn next_version(conn: &Connection) -> Result<u64> {
    conn.execute("UPDATE kv_clock SET version = version + 1 WHERE id = 1", [])?;
    let raw: i64 = conn.query_row("SELECT version FROM kv_clock WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    to_version(raw)
}

/// The key's version if it exists and has not expired.
fn live_version(conn: &Connection, key: &str, now: i64) -> Result<Option<u64>> {
    let row: Option<(i64, Option<i64>)> = conn
        .query_row(
            "SELECT version, expires_at FROM kv WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((version, expires_at)) if expires_at.map_or(true, |at| at > now) => {
            Ok(Some(to_version(version)?))
        }
        _ => Ok(None),
    }
}

fn upsert(conn: &Connection, key: &str, value: &[u8], version: u64, expires_at: Option<i64>) -> Result<()> {
    let version = i64::try_from(version)
        .map_err(|_| StoreError::Serialization(format!("version overflow {version}")))?;
    conn.execute(
        "INSERT INTO kv (key, value, version, expires_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            version = excluded.version,
            expires_at = excluded.expires_at",
        params![key, value, version, expires_at],
    )?;
    Ok(())
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn purge_expired(&self) -> Result<usize> {
        self.blocking(|conn| {
            let removed = conn.execute(
                "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now_millis()],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let now = now_millis();
            let row: Option<(Vec<u8>, i64, Option<i64>)> = conn
                .query_row(
                    "SELECT value, version, expires_at FROM kv WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            match row {
                Some((value, version, expires_at)) if expires_at.map_or(true, |at| at > now) => {
                    Ok(Some(Entry {
                        value: Bytes::from(value),
                        version: to_version(version)?,
                    }))
                }
                _ => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<u64> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let version = next_version(&tx)?;
            upsert(&tx, &key, &value, version, expiry(ttl, now_millis()))?;
            tx.commit()?;
            Ok(version)
        })
        .await
    }

    async fn put_if_version(
        &self,
        key: &str,
        value: Bytes,
        expected: Option<u64>,
        ttl: Option<Duration>,
    ) -> Result<PutResult> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let now = now_millis();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = live_version(&tx, &key, now)?;
            if current != expected {
                tracing::debug!(key = %key, ?expected, ?current, "compare-and-swap conflict");
                return Ok(PutResult::Conflict { current });
            }
            let version = next_version(&tx)?;
            upsert(&tx, &key, &value, version, expiry(ttl, now))?;
            tx.commit()?;
            Ok(PutResult::Written { version })
        })
        .await
    }
}
