//! The Kernel: one entry point over capsules, feeds and pairing.
//!
//! Every operation is a self-contained request against the store. The
//! kernel holds no per-identity state in memory and runs no timers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use capsule_kernel_core::AgentId;
use capsule_kernel_policy::{authorize, AccessDecision, AccessPolicy, Resource, Tier};
use capsule_kernel_store::KvStore;
use capsule_kernel_sync::{
    CacheHeaders, CachePolicy, Conditional, FeedHeadResponse, HeadResponse, HistoryResponse,
};

use crate::capsule::{CapsuleDocument, StateRecord, StateStore, WriteOutcome, WriteRequest};
use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::feed::{FeedDocument, FeedStore};
use crate::history::{HistoryVersion, Since};
use crate::pairing::{PairingOutcome, PairingQueue};
use crate::verify::{ChainVerifier, VerifyReport};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The main Kernel struct.
///
/// Provides:
/// - Signed capsule writes through the acceptance pipeline
/// - Head polls, conditional reads, history and verification reports
/// - Feed publish and read
/// - Pairing
pub struct Kernel<S: KvStore> {
    store: Arc<S>,
    config: Arc<KernelConfig>,
    state: StateStore<S>,
    feeds: FeedStore<S>,
    pairing: PairingQueue<S>,
    clock: Clock,
}

impl<S: KvStore> Kernel<S> {
    /// Create a new kernel instance.
    pub fn new(store: S, config: KernelConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    /// Create a kernel over a store that other components also hold.
    pub fn from_shared(store: Arc<S>, config: KernelConfig) -> Self {
        let config = Arc::new(config);
        Self {
            state: StateStore::new(store.clone(), config.clone()),
            feeds: FeedStore::new(store.clone(), config.feed.clone(), config.max_commit_retries),
            pairing: PairingQueue::new(store.clone(), config.pairing.clone()),
            store,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock, e.g. with a fixed time in tests.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn cache_policy(&self, public: bool) -> CachePolicy {
        CachePolicy {
            max_age_secs: self.config.poll_ttl_secs,
            public,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Capsules
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a signed write through the acceptance pipeline.
    pub async fn write_capsule(&self, request: &WriteRequest) -> Result<WriteOutcome> {
        let outcome = self.state.write(request, self.now()).await?;
        if let Some(rejection) = outcome.rejection() {
            debug!(
                agent_id = %request.agent_id,
                reasons = ?rejection.reason_codes.to_strings(),
                retry_later = rejection.is_transient(),
                "capsule write rejected"
            );
        }
        Ok(outcome)
    }

    /// Load a capsule and check that `requester` may read `resource` of it.
    async fn readable(
        &self,
        agent_id: &AgentId,
        requester: Option<&AgentId>,
        resource: Resource,
    ) -> Result<(CapsuleDocument, AccessPolicy)> {
        let doc = self
            .state
            .load(agent_id)
            .await?
            .ok_or_else(|| KernelError::NotFound(agent_id.clone()))?
            .value;
        let policy = AccessPolicy::from_payload(&doc.record.payload);
        match authorize(&policy, agent_id, requester, resource, self.now()) {
            AccessDecision::Allow => Ok((doc, policy)),
            AccessDecision::Deny(reason) => {
                debug!(agent_id = %agent_id, ?resource, %reason, "read denied");
                Err(KernelError::AccessDenied(reason))
            }
        }
    }

    /// Cheap poll: where the capsule is now, and whether that differs from
    /// `known_cursor`. The owner also sees their quota position.
    pub async fn head(
        &self,
        agent_id: &AgentId,
        requester: Option<&AgentId>,
        known_cursor: Option<&str>,
        tier: Tier,
    ) -> Result<HeadResponse> {
        let (doc, _) = self.readable(agent_id, requester, Resource::Head).await?;
        let record = doc.record;

        let quota = if requester == Some(agent_id) {
            let limits = self.config.limits(tier);
            Some(
                self.state
                    .quota()
                    .snapshot(agent_id, tier, limits, self.now())
                    .await?,
            )
        } else {
            None
        };

        Ok(HeadResponse {
            agent_id: agent_id.clone(),
            changed: known_cursor.map_or(true, |known| !record.cursor.matches(known)),
            cursor: record.cursor,
            prev_cursor: record.prev_cursor,
            seq: record.seq,
            updated_at: record.updated_at,
            ttl: self.config.poll_ttl_secs,
            quota,
        })
    }

    /// Full read honouring `If-None-Match`.
    pub async fn read(
        &self,
        agent_id: &AgentId,
        requester: Option<&AgentId>,
        if_none_match: Option<&str>,
    ) -> Result<Conditional<StateRecord>> {
        let (doc, policy) = self.readable(agent_id, requester, Resource::Capsule).await?;
        let record = doc.record;
        let headers = CacheHeaders::new(
            &record.cursor,
            record.prev_cursor.as_ref(),
            self.cache_policy(policy.public),
        );
        let response = Conditional::evaluate(if_none_match, headers, move || record);
        if !response.is_modified() {
            debug!(agent_id = %agent_id, "conditional read not modified");
        }
        Ok(response)
    }

    /// Retained history, in full or relative to a cursor the client holds.
    pub async fn history(
        &self,
        agent_id: &AgentId,
        requester: Option<&AgentId>,
        since: Option<&str>,
    ) -> Result<HistoryResponse> {
        let (doc, _) = self.readable(agent_id, requester, Resource::History).await?;
        let history = doc.history;

        let Some(since) = since else {
            return Ok(HistoryResponse::Full {
                agent_id: agent_id.clone(),
                total_writes: history.total_writes,
                retained: history.retained(),
                pruned: history.pruned(),
                versions: history.entries(),
            });
        };

        Ok(match history.since(since) {
            Since::Delta(newer) => HistoryResponse::Delta {
                agent_id: agent_id.clone(),
                since: since.to_string(),
                versions: newer.iter().map(HistoryVersion::to_entry).collect(),
            },
            Since::ResyncRequired => {
                debug!(agent_id = %agent_id, since, "history cursor outside retained window");
                HistoryResponse::ResyncRequired {
                    agent_id: agent_id.clone(),
                    since: since.to_string(),
                    total_writes: history.total_writes,
                    retained: history.retained(),
                }
            }
        })
    }

    /// Audit the stored capsule under the given tier's limits.
    pub async fn verify(
        &self,
        agent_id: &AgentId,
        requester: Option<&AgentId>,
        tier: Tier,
    ) -> Result<VerifyReport> {
        let (doc, _) = self.readable(agent_id, requester, Resource::Verify).await?;
        let verifier = ChainVerifier::new(self.config.limits(tier), &self.config.safety);
        Ok(verifier.verify(agent_id, &doc))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Feeds
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish a signed batch of items to `publisher`'s feed.
    pub async fn publish_feed(&self, publisher: &AgentId, body: &[u8]) -> Result<WriteOutcome> {
        self.feeds.publish(publisher, body, self.now()).await
    }

    /// Feeds follow the access policy of the publisher's capsule. A publisher
    /// without a capsule has a public feed.
    async fn feed_policy(
        &self,
        publisher: &AgentId,
        requester: Option<&AgentId>,
    ) -> Result<AccessPolicy> {
        let policy = self
            .state
            .load(publisher)
            .await?
            .map(|doc| AccessPolicy::from_payload(&doc.value.record.payload))
            .unwrap_or_default();
        match authorize(&policy, publisher, requester, Resource::Feed, self.now()) {
            AccessDecision::Allow => Ok(policy),
            AccessDecision::Deny(reason) => Err(KernelError::AccessDenied(reason)),
        }
    }

    async fn readable_feed(
        &self,
        publisher: &AgentId,
        requester: Option<&AgentId>,
    ) -> Result<(FeedDocument, AccessPolicy)> {
        let policy = self.feed_policy(publisher, requester).await?;
        let doc = self
            .feeds
            .load(publisher)
            .await?
            .ok_or_else(|| KernelError::NotFound(publisher.clone()))?
            .value;
        Ok((doc, policy))
    }

    pub async fn read_feed(
        &self,
        publisher: &AgentId,
        requester: Option<&AgentId>,
        if_none_match: Option<&str>,
    ) -> Result<Conditional<FeedDocument>> {
        let (doc, policy) = self.readable_feed(publisher, requester).await?;
        let headers = CacheHeaders::new(
            &doc.cursor,
            doc.prev_cursor.as_ref(),
            self.cache_policy(policy.public),
        );
        Ok(Conditional::evaluate(if_none_match, headers, move || doc))
    }

    pub async fn feed_head(
        &self,
        publisher: &AgentId,
        requester: Option<&AgentId>,
        known_cursor: Option<&str>,
    ) -> Result<FeedHeadResponse> {
        let (doc, _) = self.readable_feed(publisher, requester).await?;
        Ok(FeedHeadResponse {
            publisher: publisher.clone(),
            changed: known_cursor.map_or(true, |known| !doc.cursor.matches(known)),
            item_count: doc.items.len(),
            cursor: doc.cursor,
            prev_cursor: doc.prev_cursor,
            seq: doc.seq,
            sources_included: doc.sources_included,
            updated_at: doc.updated_at,
            ttl: self.config.poll_ttl_secs,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pairing
    // ─────────────────────────────────────────────────────────────────────────

    /// Pair with a waiting agent, or wait to be paired.
    pub async fn request_pairing(&self, agent_id: &AgentId) -> Result<PairingOutcome> {
        self.pairing.request(agent_id, self.now()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop expired quota counters and pairing slots from the store.
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self.store.purge_expired().await?;
        if removed > 0 {
            debug!(removed, "purged expired entries");
        }
        Ok(removed)
    }
}
