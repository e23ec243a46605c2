//! Daily quotas over the key-value store.
//!
//! Counters live in per-day buckets whose key embeds the UTC date, so a new
//! day starts from zero without any reset job. Increments are
//! compare-and-swap with bounded retry; when every retry loses, the engine
//! falls back to a blind write and logs it. Counts can therefore drift by
//! at most the number of writers that exhausted their retries at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{debug, warn};

use capsule_kernel_core::AgentId;
use capsule_kernel_policy::{Tier, TierLimits};
use capsule_kernel_store::{KvStore, KvStoreExt, PutResult};
use capsule_kernel_sync::QuotaSnapshot;

use crate::error::Result;
use crate::keys::{load_json, new_agent_quota_key, write_quota_key};

/// Lifetime of a day bucket.
pub const BUCKET_TTL: Duration = Duration::from_secs(86_400);

/// The UTC day a timestamp falls in.
pub fn day_bucket(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// The next UTC midnight after `now`.
pub fn next_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    match now.date_naive().succ_opt() {
        Some(day) => Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)),
        None => now + chrono::Duration::days(1),
    }
}

/// Position of one counter against its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub used: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

impl QuotaCheck {
    /// One more event would still be within the limit.
    pub fn allowed(&self) -> bool {
        self.used < self.limit
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

/// Quota counters for writes per identity and new identities per IP hash.
pub struct QuotaEngine<S: KvStore> {
    store: Arc<S>,
    max_retries: u32,
}

impl<S: KvStore> QuotaEngine<S> {
    pub fn new(store: Arc<S>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    pub async fn check_write(
        &self,
        agent_id: &AgentId,
        limits: &TierLimits,
        now: DateTime<Utc>,
    ) -> Result<QuotaCheck> {
        let key = write_quota_key(agent_id, day_bucket(now));
        self.check(&key, limits.writes_per_day, now).await
    }

    pub async fn check_new_agent(
        &self,
        ip_hash: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<QuotaCheck> {
        let key = new_agent_quota_key(ip_hash, day_bucket(now));
        self.check(&key, limit, now).await
    }

    /// Count one accepted write. Returns the new count.
    pub async fn record_write(&self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<u32> {
        self.increment(&write_quota_key(agent_id, day_bucket(now))).await
    }

    /// Count one identity created from `ip_hash`. Returns the new count.
    pub async fn record_new_agent(&self, ip_hash: &str, now: DateTime<Utc>) -> Result<u32> {
        self.increment(&new_agent_quota_key(ip_hash, day_bucket(now)))
            .await
    }

    /// The owner-facing view of today's write quota.
    pub async fn snapshot(
        &self,
        agent_id: &AgentId,
        tier: Tier,
        limits: &TierLimits,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let check = self.check_write(agent_id, limits, now).await?;
        Ok(QuotaSnapshot {
            tier,
            used: check.used,
            limit: check.limit,
            remaining: check.remaining(),
            reset_at: check.reset_at,
        })
    }

    async fn check(&self, key: &str, limit: u32, now: DateTime<Utc>) -> Result<QuotaCheck> {
        let used = load_json::<S, u32>(&self.store, key)
            .await?
            .map_or(0, |v| v.value);
        Ok(QuotaCheck {
            used,
            limit,
            reset_at: next_reset(now),
        })
    }

    async fn increment(&self, key: &str) -> Result<u32> {
        for attempt in 0..=self.max_retries {
            let current = load_json::<S, u32>(&self.store, key).await?;
            let (count, expected) = current.map_or((0, None), |v| (v.value, Some(v.version)));
            let next = count.saturating_add(1);
            match self
                .store
                .put_json_if_version(key, &next, expected, Some(BUCKET_TTL))
                .await?
            {
                PutResult::Written { .. } => return Ok(next),
                PutResult::Conflict { .. } => {
                    debug!(key, attempt, "quota increment lost a race");
                }
            }
        }

        let count = load_json::<S, u32>(&self.store, key)
            .await?
            .map_or(0, |v| v.value);
        let next = count.saturating_add(1);
        self.store.put_json(key, &next, Some(BUCKET_TTL)).await?;
        warn!(key, count = next, "quota increment fell back to a blind write");
        Ok(next)
    }
}
