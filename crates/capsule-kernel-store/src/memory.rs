//! In-memory implementation of the KvStore trait.
//!
//! Same semantics as SQLite, including expiry and versioned compare-and-swap,
//! with no persistence. Used by tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::traits::{Entry, KvStore, PutResult};

/// In-memory store. Thread-safe via RwLock.
pub struct MemoryKv {
    inner: RwLock<MemoryKvInner>,
}

struct MemoryKvInner {
    slots: HashMap<String, Slot>,
    /// Last version handed out. Shared by all keys so a version never repeats.
    clock: u64,
}

struct Slot {
    value: Bytes,
    version: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryKvInner {
                slots: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.read()
            .map(|inner| inner.slots.values().filter(|s| s.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryKvInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryKvInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvInner {
    fn live_version(&self, key: &str, now: Instant) -> Option<u64> {
        self.slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.version)
    }

    fn store(&mut self, key: &str, value: Bytes, ttl: Option<Duration>, now: Instant) -> u64 {
        self.clock += 1;
        let version = self.clock;
        self.slots.insert(
            key.to_string(),
            Slot {
                value,
                version,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        version
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut inner = self.write()?;
        let before = inner.slots.len();
        inner.slots.retain(|_, slot| slot.is_live(now));
        Ok(before - inner.slots.len())
    }

    async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let now = Instant::now();
        let inner = self.read()?;
        Ok(inner
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| Entry {
                value: slot.value.clone(),
                version: slot.version,
            }))
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<u64> {
        let now = Instant::now();
        let mut inner = self.write()?;
        Ok(inner.store(key, value, ttl, now))
    }

    async fn put_if_version(
        &self,
        key: &str,
        value: Bytes,
        expected: Option<u64>,
        ttl: Option<Duration>,
    ) -> Result<PutResult> {
        let now = Instant::now();
        let mut inner = self.write()?;
        let current = inner.live_version(key, now);
        if current != expected {
            return Ok(PutResult::Conflict { current });
        }
        let version = inner.store(key, value, ttl, now);
        Ok(PutResult::Written { version })
    }
}
