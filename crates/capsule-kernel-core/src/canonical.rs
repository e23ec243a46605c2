//! Canonical JSON encoding for deterministic hashing and signing.
//!
//! Rules:
//! - Object keys sorted by UTF-8 byte order, at every depth
//! - Array order preserved
//! - Compact separators, no insignificant whitespace
//! - Scalars encoded exactly as serde_json encodes them
//!
//! Keys are sorted explicitly rather than relying on `serde_json::Map`
//! iteration order, which becomes insertion order when any crate in the
//! build enables `preserve_order`.
//!
//! **CRITICAL**: This encoding is FROZEN. Changes break every stored cursor
//! and every signature produced by existing clients.

use serde::Serialize;
use serde_json::{json, Value};

use crate::crypto::Sha256Hash;
use crate::error::{CoreError, Result};
use crate::types::{AgentId, Cursor};

/// Canonicalize a JSON value.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

/// Canonicalize any serializable value.
pub fn canonicalize_serialize<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).map_err(|e| CoreError::Encoding(e.to_string()))?;
    Ok(canonicalize(&value))
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_canonical(out, item);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // Display for Value::String is serde_json's own escaping.
    out.push_str(&Value::String(s.to_owned()).to_string());
}

/// Compute the content-addressed cursor of a payload.
pub fn cursor(payload: &Value) -> Cursor {
    Cursor::from_hash(&Sha256Hash::hash(canonicalize(payload).as_bytes()))
}

/// Size in bytes of the canonical encoding.
pub fn canonical_len(payload: &Value) -> usize {
    canonicalize(payload).len()
}

/// The 32-byte digest an envelope signature covers.
///
/// Binds identity, order, and content in one hash:
/// `SHA256(canonicalize({agent_id, seq, payload}))`.
pub fn signing_digest(agent_id: &AgentId, seq: i64, payload: &Value) -> Sha256Hash {
    let message = json!({
        "agent_id": agent_id.as_str(),
        "seq": seq,
        "payload": payload,
    });
    Sha256Hash::hash(canonicalize(&message).as_bytes())
}

/// One feed entry as it contributes to the feed cursor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeedCursorEntry<'a> {
    pub source: &'a str,
    pub id: &'a str,
    pub content_hash: &'a str,
}

/// Compute a feed cursor from its entries.
///
/// The hashed payload is `{sources_included, items}` with sources sorted and
/// deduplicated and items sorted as `(source, id, content_hash)` triples, so
/// the cursor changes iff the set of triples changes. Timestamps and arrival
/// order never reach the hash.
pub fn feed_cursor<'a, I>(entries: I) -> Cursor
where
    I: IntoIterator<Item = FeedCursorEntry<'a>>,
{
    let mut triples: Vec<FeedCursorEntry<'a>> = entries.into_iter().collect();
    triples.sort();
    triples.dedup();

    let mut sources: Vec<&str> = triples.iter().map(|t| t.source).collect();
    sources.sort_unstable();
    sources.dedup();

    let payload = json!({
        "sources_included": sources,
        "items": triples
            .iter()
            .map(|t| json!([t.source, t.id, t.content_hash]))
            .collect::<Vec<_>>(),
    });
    cursor(&payload)
}
