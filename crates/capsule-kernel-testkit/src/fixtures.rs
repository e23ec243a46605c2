//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use capsule_kernel_core::{AgentId, Envelope, Keypair};
use capsule_kernel_store::MemoryKv;

/// An agent with a keypair, able to sign envelopes for itself.
#[derive(Debug, Clone)]
pub struct TestAgent {
    pub keypair: Keypair,
    pub agent_id: AgentId,
}

impl TestAgent {
    /// Create an agent with a random keypair.
    pub fn new() -> Self {
        Self::from_keypair(Keypair::generate())
    }

    /// Create with a deterministic keypair: the seed is `byte` repeated.
    pub fn with_seed(byte: u8) -> Self {
        Self::from_keypair(Keypair::from_seed(&[byte; 32]))
    }

    fn from_keypair(keypair: Keypair) -> Self {
        let agent_id = AgentId::derive(&keypair.public_key());
        Self { keypair, agent_id }
    }

    pub fn envelope(&self, seq: i64, payload: Value) -> Envelope {
        Envelope::sign(&self.keypair, seq, payload)
    }

    /// A signed write body, ready to send.
    pub fn body(&self, seq: i64, payload: Value) -> Vec<u8> {
        self.envelope(seq, payload).to_bytes()
    }

    /// A signed feed publish body.
    pub fn feed_body(&self, seq: i64, items: Vec<Value>) -> Vec<u8> {
        self.body(seq, json!({ "items": items }))
    }
}

impl Default for TestAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// `n` deterministic agents with seeds 1..=n.
pub fn agents(n: u8) -> Vec<TestAgent> {
    (1..=n).map(TestAgent::with_seed).collect()
}

/// A fresh in-memory store.
pub fn memory_store() -> MemoryKv {
    MemoryKv::new()
}

/// The smallest payload the schema accepts.
pub fn minimal_payload() -> Value {
    json!({ "schema": "agent-capsule/v1" })
}

/// A valid payload carrying a memory summary.
pub fn payload_with_summary(summary: &str) -> Value {
    json!({
        "schema": "agent-capsule/v1",
        "memory": { "summary": summary },
    })
}

/// A valid payload exercising every optional section.
pub fn full_payload(agent_id: &AgentId) -> Value {
    json!({
        "schema": "agent-capsule/v1",
        "agent_id": agent_id.as_str(),
        "updated_at": "2026-01-14T12:00:00Z",
        "profile": {
            "name": "Scout",
            "description": "Watches public feeds.",
            "tags": ["news", "rss"],
        },
        "memory": {
            "summary": "Tracks three feeds.",
            "facts": [
                { "key": "home.region", "value": "eu-west" },
                { "key": "cadence", "value": "hourly", "updated_at": "2026-01-14T12:00:00Z" },
            ],
        },
        "links": [{ "rel": "home", "url": "https://example.org/scout" }],
        "access_control": { "public": true, "grants": [] },
    })
}

/// A private payload with the given raw grant entries.
pub fn private_payload(grants: Vec<Value>) -> Value {
    json!({
        "schema": "agent-capsule/v1",
        "access_control": { "public": false, "grants": grants },
    })
}

/// A scoped grant entry.
pub fn scoped_grant(agent_id: &AgentId, scopes: &[&str], expires_at: Option<DateTime<Utc>>) -> Value {
    let mut grant = json!({ "agent_id": agent_id.as_str(), "scopes": scopes });
    if let Some(at) = expires_at {
        grant["expires_at"] = json!(at.to_rfc3339());
    }
    grant
}

/// A valid feed item published at `published_at`.
pub fn feed_item(id: &str, source: &str, published_at: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "source": source,
        "url": format!("https://news.example.com/{source}/{id}"),
        "headline": format!("Story {id}"),
        "published_at": published_at.to_rfc3339(),
        "provenance": {
            "fetched_at": published_at.to_rfc3339(),
            "evidence_urls": [format!("https://archive.example.org/{id}")],
            "content_hash": content_hash(id),
        },
    })
}

/// A well-formed, deterministic content hash for an item id.
pub fn content_hash(id: &str) -> String {
    let digest = capsule_kernel_core::Sha256Hash::hash(id.as_bytes());
    format!("sha256:{}", digest.to_hex())
}
