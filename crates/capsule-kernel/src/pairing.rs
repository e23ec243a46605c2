//! A single-slot pairing queue.
//!
//! An agent asking to be paired either takes the agent already waiting in
//! the slot, or becomes the waiting agent itself. Both moves are
//! compare-and-swap on one key. After `max_retries` lost races the request
//! gives up and reports [`PairingOutcome::Unpaired`]; two agents arriving at
//! the same instant can both end up there, and must simply ask again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use capsule_kernel_core::AgentId;
use capsule_kernel_store::{KvStore, KvStoreExt, PutResult};

use crate::config::PairingConfig;
use crate::error::Result;
use crate::keys::{load_json, PAIRING_KEY};

/// The agent currently waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingSlot {
    pub agent_id: AgentId,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired { peer: AgentId },
    Waiting,
    Unpaired,
}

pub struct PairingQueue<S: KvStore> {
    store: Arc<S>,
    config: PairingConfig,
}

impl<S: KvStore> PairingQueue<S> {
    pub fn new(store: Arc<S>, config: PairingConfig) -> Self {
        Self { store, config }
    }

    fn is_live(&self, slot: &PairingSlot, now: DateTime<Utc>) -> bool {
        let waited = now.signed_duration_since(slot.since);
        waited.num_seconds() < i64::try_from(self.config.wait_secs).unwrap_or(i64::MAX)
    }

    /// The agent waiting right now, if any.
    pub async fn waiting(&self, now: DateTime<Utc>) -> Result<Option<PairingSlot>> {
        let slot = load_json::<S, Option<PairingSlot>>(&self.store, PAIRING_KEY).await?;
        Ok(slot
            .and_then(|v| v.value)
            .filter(|slot| self.is_live(slot, now)))
    }

    pub async fn request(&self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<PairingOutcome> {
        for attempt in 0..=self.config.max_retries {
            let current = load_json::<S, Option<PairingSlot>>(&self.store, PAIRING_KEY).await?;
            let expected = current.as_ref().map(|v| v.version);
            let live = current
                .and_then(|v| v.value)
                .filter(|slot| self.is_live(slot, now));

            let (next, outcome) = match live {
                Some(slot) if &slot.agent_id == agent_id => return Ok(PairingOutcome::Waiting),
                Some(slot) => (None, PairingOutcome::Paired { peer: slot.agent_id }),
                None => (
                    Some(PairingSlot {
                        agent_id: agent_id.clone(),
                        since: now,
                    }),
                    PairingOutcome::Waiting,
                ),
            };

            match self
                .store
                .put_json_if_version(PAIRING_KEY, &next, expected, Some(self.config.wait()))
                .await?
            {
                PutResult::Written { .. } => {
                    if let PairingOutcome::Paired { peer } = &outcome {
                        info!(agent_id = %agent_id, peer = %peer, "agents paired");
                    }
                    return Ok(outcome);
                }
                PutResult::Conflict { .. } => {
                    debug!(agent_id = %agent_id, attempt, "pairing slot changed underneath");
                }
            }
        }
        info!(agent_id = %agent_id, "pairing gave up after repeated conflicts");
        Ok(PairingOutcome::Unpaired)
    }
}
