//! Tier-dependent size, cardinality and quota limits.
//!
//! Tier resolution (credential → tier label) happens outside the kernel; the
//! resolved [`Tier`] arrives with each request and selects a [`TierLimits`]
//! value from configuration.

use serde::{Deserialize, Serialize};

/// A resolved service tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Elevated,
}

/// Limits applied to one write, chosen by tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    /// Raw request body cap, checked before parsing.
    pub max_raw_bytes: usize,
    /// Canonical payload cap, checked after parsing.
    pub max_capsule_bytes: usize,
    /// `memory.summary` length in characters.
    pub max_summary_chars: usize,
    /// Entries in `memory.facts`.
    pub max_facts: usize,
    /// Entries in `access_control.grants`.
    pub max_grants: usize,
    /// Entries in `profile.tags`.
    pub max_tags: usize,
    /// Entries in `links`.
    pub max_links: usize,
    /// Accepted writes per identity per UTC day.
    pub writes_per_day: u32,
}

impl TierLimits {
    pub fn free() -> Self {
        Self {
            max_raw_bytes: 64 * 1024,
            max_capsule_bytes: 32 * 1024,
            max_summary_chars: 2_000,
            max_facts: 50,
            max_grants: 16,
            max_tags: 16,
            max_links: 16,
            writes_per_day: 200,
        }
    }

    pub fn elevated() -> Self {
        Self {
            max_raw_bytes: 256 * 1024,
            max_capsule_bytes: 128 * 1024,
            max_summary_chars: 8_000,
            max_facts: 500,
            max_grants: 128,
            max_tags: 64,
            max_links: 64,
            writes_per_day: 5_000,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self::free()
    }
}
