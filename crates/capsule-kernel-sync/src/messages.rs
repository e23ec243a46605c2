//! Wire message types for the polling surface.
//!
//! These are the JSON bodies exchanged over plain HTTP: write results, head
//! pointers, history listings and feed heads. They carry no behaviour beyond
//! construction helpers.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use capsule_kernel_core::{AgentId, Cursor, ReasonCodes};
use capsule_kernel_policy::{Finding, Tier};

use crate::error::Result;

/// Decode any message from a response body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

/// Encode any message as a response body.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// A per-item problem in a feed publish batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItemError {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub code: String,
}

/// Result of a capsule write or a feed publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default)]
    pub prev_cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    #[serde(default, skip_serializing_if = "ReasonCodes::is_empty")]
    pub reason_codes: ReasonCodes,
    /// When a quota rejection stops applying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_errors: Vec<FeedItemError>,
}

impl WriteResponse {
    pub fn accepted(seq: i64, cursor: Cursor, prev_cursor: Option<Cursor>) -> Self {
        let changed = prev_cursor.as_ref() != Some(&cursor);
        Self {
            accepted: true,
            seq: Some(seq),
            cursor: Some(cursor),
            prev_cursor,
            changed: Some(changed),
            reason_codes: ReasonCodes::new(),
            reset_at: None,
            findings: Vec::new(),
            item_errors: Vec::new(),
        }
    }

    pub fn rejected(reason_codes: ReasonCodes) -> Self {
        Self {
            accepted: false,
            seq: None,
            cursor: None,
            prev_cursor: None,
            changed: None,
            reason_codes,
            reset_at: None,
            findings: Vec::new(),
            item_errors: Vec::new(),
        }
    }

    pub fn with_reset_at(mut self, reset_at: Option<DateTime<Utc>>) -> Self {
        self.reset_at = reset_at;
        self
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_item_errors(mut self, item_errors: Vec<FeedItemError>) -> Self {
        self.item_errors = item_errors;
        self
    }
}

/// Daily write quota position for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub tier: Tier,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Lightweight pointer returned by a head poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadResponse {
    pub agent_id: AgentId,
    pub cursor: Cursor,
    pub prev_cursor: Option<Cursor>,
    pub seq: i64,
    pub updated_at: DateTime<Utc>,
    /// Whether `cursor` differs from the cursor the poller already knew.
    pub changed: bool,
    /// Suggested seconds until the next poll.
    pub ttl: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaSnapshot>,
}

/// One retained version as listed to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: i64,
    pub cursor: Cursor,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
    /// Whether a signer record was retained for this version.
    pub signed: bool,
}

/// History listing, full or relative to a known cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HistoryResponse {
    Full {
        agent_id: AgentId,
        total_writes: u64,
        retained: usize,
        /// Older versions were dropped to stay within capacity.
        pruned: bool,
        versions: Vec<HistoryEntry>,
    },
    /// Versions strictly newer than `since`, newest first. May be empty.
    Delta {
        agent_id: AgentId,
        since: String,
        versions: Vec<HistoryEntry>,
    },
    /// `since` is not in the retained window; the client must refetch in full.
    ResyncRequired {
        agent_id: AgentId,
        since: String,
        total_writes: u64,
        retained: usize,
    },
}

impl HistoryResponse {
    pub fn is_resync_required(&self) -> bool {
        matches!(self, HistoryResponse::ResyncRequired { .. })
    }

    pub fn versions(&self) -> &[HistoryEntry] {
        match self {
            HistoryResponse::Full { versions, .. } | HistoryResponse::Delta { versions, .. } => {
                versions
            }
            HistoryResponse::ResyncRequired { .. } => &[],
        }
    }
}

/// Lightweight pointer for a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedHeadResponse {
    pub publisher: AgentId,
    pub cursor: Cursor,
    pub prev_cursor: Option<Cursor>,
    pub seq: i64,
    pub item_count: usize,
    pub sources_included: Vec<String>,
    pub updated_at: DateTime<Utc>,
    pub changed: bool,
    pub ttl: u64,
}
