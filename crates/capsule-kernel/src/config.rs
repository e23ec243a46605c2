//! Kernel configuration.
//!
//! Plain values with defaults. The kernel never reads files or the
//! environment; a host deserializes this from whatever source it likes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use capsule_kernel_policy::{SafetyConfig, Tier, TierLimits};

/// Configuration for the Kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub free: TierLimits,
    pub elevated: TierLimits,
    /// Versions retained per capsule.
    pub history_capacity: usize,
    /// Suggested poll interval, also the `max-age` of read responses.
    pub poll_ttl_secs: u64,
    /// Extra compare-and-swap attempts after the first one loses.
    pub max_commit_retries: u32,
    /// New identities one IP hash may create per UTC day.
    pub new_agents_per_ip_per_day: u32,
    pub feed: FeedConfig,
    pub safety: SafetyConfig,
    pub pairing: PairingConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            free: TierLimits::free(),
            elevated: TierLimits::elevated(),
            history_capacity: 50,
            poll_ttl_secs: 60,
            max_commit_retries: 3,
            new_agents_per_ip_per_day: 5,
            feed: FeedConfig::default(),
            safety: SafetyConfig::default(),
            pairing: PairingConfig::default(),
        }
    }
}

impl KernelConfig {
    /// Limits for a resolved tier.
    pub fn limits(&self, tier: Tier) -> &TierLimits {
        match tier {
            Tier::Free => &self.free,
            Tier::Elevated => &self.elevated,
        }
    }
}

/// Feed merge bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Items kept after a merge.
    pub max_items: usize,
    /// Items published longer ago than this are dropped on merge.
    pub max_age_secs: u64,
    /// Raw publish body cap.
    pub max_raw_bytes: usize,
    pub max_headline_chars: usize,
    pub max_evidence_urls: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_items: 200,
            max_age_secs: 7 * 24 * 60 * 60,
            max_raw_bytes: 512 * 1024,
            max_headline_chars: 300,
            max_evidence_urls: 10,
        }
    }
}

impl FeedConfig {
    pub fn max_age(&self) -> chrono::Duration {
        let secs = i64::try_from(self.max_age_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        chrono::Duration::seconds(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// How long a waiting agent stays eligible for pairing.
    pub wait_secs: u64,
    /// Extra compare-and-swap attempts before giving up unpaired.
    pub max_retries: u32,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            wait_secs: 300,
            max_retries: 3,
        }
    }
}

impl PairingConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}
