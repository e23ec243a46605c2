//! Golden test vectors for deterministic verification.
//!
//! These vectors pin the canonical encoding, cursors, identity derivation
//! and envelope signatures, so that independent clients can check their
//! output byte for byte.

use serde_json::{json, Value};

use capsule_kernel_core::{
    canonicalize, cursor, feed_cursor, signing_digest, AgentId, Envelope, FeedCursorEntry,
    Keypair,
};

/// A golden test vector for one signed write.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Seed byte; the keypair seed is this byte repeated 32 times.
    pub seed: u8,
    pub seq: i64,
    pub payload: Value,
    /// Expected public key (hex).
    pub public_key: &'static str,
    /// Expected agent id.
    pub agent_id: &'static str,
    /// Expected canonical payload.
    pub canonical: String,
    /// Expected cursor.
    pub cursor: &'static str,
    /// Expected signing digest (hex).
    pub digest: &'static str,
    /// Expected Ed25519 signature (hex).
    pub signature: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "minimal payload, first write",
            seed: 0x01,
            seq: 0,
            payload: json!({"schema": "agent-capsule/v1"}),
            public_key: "8a88e3dd7409f195fd52db2d3cba5d72ca6709bf1d94121bf3748801b40f6f5c",
            agent_id: "34750f98bd59fcfc946da45aaabe933be154a4b5094e1c4abf42866505f3c97e",
            canonical: r#"{"schema":"agent-capsule/v1"}"#.to_string(),
            cursor: "sha256:3936a18406aa5078933097e2b1bb877ee689ce25f6aa8e2a2cacc8331898630c",
            digest: "6273fabc1f7e121eea02f5bcad53e883567b134ed59e5f2ddc0520e9b10de4b0",
            signature: "0d3c0ec04963c5781d70278d4488d51ae360e74dee392f91f6c27fb4c4737b5b3e704b29160ffd7f124bdf16c2b04eceecc5cd2e4f545b48bb5c58df09d5430e",
        },
        GoldenVector {
            name: "nested profile and memory",
            seed: 0x02,
            seq: 1,
            payload: json!({
                "schema": "agent-capsule/v1",
                "profile": {"name": "Scout", "tags": ["news", "rss"]},
                "memory": {
                    "summary": "Tracks feeds.",
                    "facts": [{"key": "home", "value": "example.org"}],
                },
            }),
            public_key: "8139770ea87d175f56a35466c34c7ecccb8d8a91b4ee37a25df60f5b8fc9b394",
            agent_id: "6a3803d5f059902a1c6dafbc9ba4729212f7caac08634cc3ae76b27529f03827",
            canonical: concat!(
                r#"{"memory":{"facts":[{"key":"home","value":"example.org"}],"summary":"Tracks feeds."},"#,
                r#""profile":{"name":"Scout","tags":["news","rss"]},"schema":"agent-capsule/v1"}"#,
            )
            .to_string(),
            cursor: "sha256:37628a2fe7b8b4ba6141ff04f331cf16e12b02f587a61a6b51cbe63880f35d95",
            digest: "65735c83da7a1f2c72f5e46752a1e652a8c61bcebe7eba423829559851d02aba",
            signature: "9030fd4bcd6e342cefb0ad40f6401ec294e0bae3828bcb161f1c916f215a34a1485aba25cc36bb6a7a59395d6f2d257c71eca870177c3b0949b9ee4beb6e670d",
        },
        GoldenVector {
            name: "private capsule with grants and links",
            seed: 0x03,
            seq: 7,
            payload: json!({
                "schema": "agent-capsule/v1",
                "access_control": {
                    "public": false,
                    "grants": [
                        "a".repeat(64),
                        {"agent_id": "b".repeat(64), "scopes": ["capsule:read"]},
                    ],
                },
                "links": [{"rel": "home", "url": "https://example.org/"}],
            }),
            public_key: "ed4928c628d1c2c6eae90338905995612959273a5c63f93636c14614ac8737d1",
            agent_id: "b62e867fa2f33afe62d5d6b1642e1621d543307846b2a57b897e710919b76709",
            canonical: format!(
                concat!(
                    r#"{{"access_control":{{"grants":["{a}",{{"agent_id":"{b}","scopes":["capsule:read"]}}],"public":false}},"#,
                    r#""links":[{{"rel":"home","url":"https://example.org/"}}],"schema":"agent-capsule/v1"}}"#,
                ),
                a = "a".repeat(64),
                b = "b".repeat(64),
            ),
            cursor: "sha256:2c2a32e710ac4f3c2885cf8c2115623a1aab25cdb4adff7de6555aaea346247f",
            digest: "3233610d6c25f8b2938da81305492e63249795291ae8889152a7f9c12c1df79c",
            signature: "4349cbf147ab93c52e5fa953340502ac8fc0fe52dba8fa7f16e030abfd25845a80239db264bfac96d4cbd093b17a38886b8d7fc0d26870461511c42fd87ecf04",
        },
    ]
}

/// A golden feed cursor.
#[derive(Debug, Clone)]
pub struct FeedVector {
    pub name: &'static str,
    /// `(source, id, content_hash)` triples in arrival order.
    pub entries: Vec<(&'static str, &'static str, String)>,
    pub cursor: &'static str,
}

pub fn feed_vectors() -> Vec<FeedVector> {
    let hash = |byte: &str| format!("sha256:{}", byte.repeat(32));
    vec![
        FeedVector {
            name: "empty feed",
            entries: vec![],
            cursor: "sha256:d1ed7132180d90f6ddbee41c1935e2d14cfc447a6874166804dfd5b6cac34728",
        },
        FeedVector {
            name: "two sources, unsorted arrival",
            entries: vec![
                ("wire", "b", hash("22")),
                ("blog", "a", hash("11")),
                ("wire", "a", hash("33")),
            ],
            cursor: "sha256:f70c2c73026777b711c2dea77a70202ee6c72e7882e11602be831631f7954977",
        },
    ]
}

/// Build the envelope a vector describes.
pub fn envelope_from_vector(vector: &GoldenVector) -> Envelope {
    Envelope::sign(&Keypair::from_seed(&[vector.seed; 32]), vector.seq, vector.payload.clone())
}

/// Check every vector, returning the names of those that do not match.
pub fn verify_all_vectors() -> Vec<&'static str> {
    let mut failures = Vec::new();
    for vector in all_vectors() {
        let envelope = envelope_from_vector(&vector);
        let Ok(agent_id) = AgentId::parse(vector.agent_id) else {
            failures.push(vector.name);
            continue;
        };
        let ok = envelope.public_key == vector.public_key
            && envelope.agent_id == vector.agent_id
            && canonicalize(&vector.payload) == vector.canonical
            && cursor(&vector.payload).as_str() == vector.cursor
            && signing_digest(&agent_id, vector.seq, &vector.payload).to_hex() == vector.digest
            && envelope.signature == vector.signature;
        if !ok {
            failures.push(vector.name);
        }
    }
    for vector in feed_vectors() {
        let computed = feed_cursor(vector.entries.iter().map(|(source, id, hash)| FeedCursorEntry {
            source,
            id,
            content_hash: hash,
        }));
        if computed.as_str() != vector.cursor {
            failures.push(vector.name);
        }
    }
    failures
}
