//! KvStore trait: the abstract interface to durable state.
//!
//! The kernel assumes nothing beyond what an eventually-consistent key-value
//! service offers: single-key reads and writes, per-key expiry, and a
//! compare-and-swap on one key at a time. There are no multi-key
//! transactions, so every invariant must be derivable from one key's value.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A stored value and the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    /// Changes on every write to the key and never repeats for it.
    pub version: u64,
}

/// A decoded value and its version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// The write happened; the key now carries `version`.
    Written { version: u64 },
    /// The key's live version was not the expected one; nothing was written.
    Conflict { current: Option<u64> },
}

impl PutResult {
    pub fn is_written(&self) -> bool {
        matches!(self, PutResult::Written { .. })
    }
}

/// Async interface for key-value persistence.
///
/// Expired entries behave exactly like absent ones for every method.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a live entry.
    async fn get(&self, key: &str) -> Result<Option<Entry>>;

    /// Unconditionally write a value. Returns the new version.
    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<u64>;

    /// Write only if the key's live version equals `expected`
    /// (`None` meaning the key must be absent or expired).
    async fn put_if_version(
        &self,
        key: &str,
        value: Bytes,
        expected: Option<u64>,
        ttl: Option<Duration>,
    ) -> Result<PutResult>;

    /// Reclaim space held by expired entries. Returns how many were dropped.
    ///
    /// Backends that expire entries on their own keep the default no-op.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// JSON helpers over any [`KvStore`].
pub trait KvStoreExt: KvStore {
    /// Read and decode a JSON value.
    fn get_json<T>(&self, key: &str) -> impl Future<Output = Result<Option<Versioned<T>>>> + Send
    where
        T: DeserializeOwned + Send;

    /// Encode and write a JSON value unconditionally.
    fn put_json<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<u64>> + Send
    where
        T: Serialize + Sync;

    /// Encode and conditionally write a JSON value.
    fn put_json_if_version<T>(
        &self,
        key: &str,
        value: &T,
        expected: Option<u64>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<PutResult>> + Send
    where
        T: Serialize + Sync;
}

impl<S: KvStore + ?Sized> KvStoreExt for S {
    async fn get_json<T>(&self, key: &str) -> Result<Option<Versioned<T>>>
    where
        T: DeserializeOwned + Send,
    {
        let Some(entry) = self.get(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&entry.value)?;
        Ok(Some(Versioned {
            value,
            version: entry.version,
        }))
    }

    async fn put_json<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<u64>
    where
        T: Serialize + Sync,
    {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.put(key, bytes, ttl).await
    }

    async fn put_json_if_version<T>(
        &self,
        key: &str,
        value: &T,
        expected: Option<u64>,
        ttl: Option<Duration>,
    ) -> Result<PutResult>
    where
        T: Serialize + Sync,
    {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.put_if_version(key, bytes, expected, ttl).await
    }
}
