//! Key layout in the backing store, and a decode helper that tells corrupt
//! documents apart from I/O failures.
//!
//! ```text
//! capsule:{agent_id}                      CapsuleDocument (record + history)
//! feed:{publisher_id}                     FeedDocument
//! quota:write:{agent_id}:{YYYY-MM-DD}     u32 counter, expires after a day
//! quota:new_agent:{ip_hash}:{YYYY-MM-DD}  u32 counter, expires after a day
//! pairing:queue                           PairingSlot
//! ```

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use capsule_kernel_core::AgentId;
use capsule_kernel_store::{KvStore, KvStoreExt, StoreError, Versioned};

use crate::error::{KernelError, Result};

pub const PAIRING_KEY: &str = "pairing:queue";

pub fn capsule_key(agent_id: &AgentId) -> String {
    format!("capsule:{agent_id}")
}

pub fn feed_key(publisher: &AgentId) -> String {
    format!("feed:{publisher}")
}

pub fn write_quota_key(agent_id: &AgentId, day: NaiveDate) -> String {
    format!("quota:write:{agent_id}:{}", day.format("%Y-%m-%d"))
}

pub fn new_agent_quota_key(ip_hash: &str, day: NaiveDate) -> String {
    format!("quota:new_agent:{ip_hash}:{}", day.format("%Y-%m-%d"))
}

/// Read and decode a JSON document. Undecodable bytes are `CorruptState`.
pub(crate) async fn load_json<S, T>(store: &S, key: &str) -> Result<Option<Versioned<T>>>
where
    S: KvStore + ?Sized,
    T: DeserializeOwned + Send,
{
    match store.get_json::<T>(key).await {
        Ok(doc) => Ok(doc),
        Err(StoreError::Serialization(reason)) => Err(KernelError::CorruptState {
            key: key.to_string(),
            reason,
        }),
        Err(e) => Err(e.into()),
    }
}
