//! The bounded, newest-first history of accepted versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use capsule_kernel_core::{Cursor, SignerRecord};
use capsule_kernel_sync::HistoryEntry;

/// One accepted version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryVersion {
    pub seq: i64,
    pub cursor: Cursor,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
    /// Public key and signature of the write, kept for later audits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<SignerRecord>,
}

impl HistoryVersion {
    pub fn to_entry(&self) -> HistoryEntry {
        HistoryEntry {
            seq: self.seq,
            cursor: self.cursor.clone(),
            payload: self.payload.clone(),
            updated_at: self.updated_at,
            signed: self.signer.is_some(),
        }
    }
}

/// Result of looking up a cursor in the retained window.
#[derive(Debug, Clone, PartialEq)]
pub enum Since<'a> {
    /// Versions strictly newer than the cursor, newest first. May be empty.
    Delta(&'a [HistoryVersion]),
    /// The cursor is not retained.
    ResyncRequired,
}

/// Retained versions, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    /// Every accepted write, including pruned ones.
    pub total_writes: u64,
    pub versions: Vec<HistoryVersion>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted version and prune to `capacity`.
    pub fn append(&mut self, version: HistoryVersion, capacity: usize) {
        self.versions.insert(0, version);
        self.total_writes = self.total_writes.saturating_add(1);
        self.prune(capacity);
    }

    pub fn prune(&mut self, capacity: usize) {
        self.versions.truncate(capacity.max(1));
    }

    /// Whether older versions have been dropped.
    pub fn pruned(&self) -> bool {
        self.total_writes > self.versions.len() as u64
    }

    pub fn head(&self) -> Option<&HistoryVersion> {
        self.versions.first()
    }

    pub fn retained(&self) -> usize {
        self.versions.len()
    }

    /// Versions newer than `cursor`.
    ///
    /// The newest version carrying `cursor` is the anchor: a payload written
    /// twice in a row anchors at its latest occurrence.
    pub fn since(&self, cursor: &str) -> Since<'_> {
        match self.versions.iter().position(|v| v.cursor.matches(cursor)) {
            Some(index) => Since::Delta(&self.versions[..index]),
            None => Since::ResyncRequired,
        }
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.versions.iter().map(HistoryVersion::to_entry).collect()
    }
}
