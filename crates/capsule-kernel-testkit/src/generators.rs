//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use capsule_kernel_core::{AgentId, Keypair};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random, well-formed AgentId.
pub fn agent_id() -> impl Strategy<Value = AgentId> {
    keypair().prop_map(|kp| AgentId::derive(&kp.public_key()))
}

/// Generate a valid sequence number.
pub fn seq() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate an arbitrary JSON value, nested up to `depth` levels.
pub fn json_value(depth: u32) -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[ -~]{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(depth, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..8)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>())),
        ]
    })
}

/// Generate a JSON object, shuffled into a random key insertion order.
///
/// Pairs with [`json_value`] for order-independence checks: the returned
/// pair holds the same entries inserted in two different orders.
pub fn reordered_object() -> impl Strategy<Value = (Value, Value)> {
    prop::collection::btree_map("[a-z]{1,6}", json_value(2), 1..10)
        .prop_flat_map(|entries| {
            let pairs: Vec<(String, Value)> = entries.into_iter().collect();
            let len = pairs.len();
            (Just(pairs), Just((0..len).collect::<Vec<_>>()).prop_shuffle())
        })
        .prop_map(|(pairs, order)| {
            let forward: Map<String, Value> = pairs.iter().cloned().collect();
            let shuffled: Map<String, Value> =
                order.into_iter().map(|i| pairs[i].clone()).collect();
            (Value::Object(forward), Value::Object(shuffled))
        })
}

/// Generate a fact key accepted by the schema.
pub fn fact_key() -> impl Strategy<Value = String> {
    "[a-z0-9_.-]{1,64}".prop_map(String::from)
}

/// Generate a tag accepted by the schema.
pub fn tag() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_-]{0,31}".prop_map(String::from)
}

/// Plain text free of anything the safety scanner flags.
pub fn safe_text(max_len: usize) -> impl Strategy<Value = String> {
    proptest::string::string_regex(&format!("[a-z ]{{0,{max_len}}}"))
        .unwrap_or_else(|_| proptest::string::string_regex("[a-z ]{0,16}").expect("valid regex"))
}

/// Generate a payload that passes schema and safety checks under free-tier limits.
pub fn capsule_payload() -> impl Strategy<Value = Value> {
    (
        safe_text(200),
        prop::collection::vec(tag(), 0..5),
        prop::collection::vec((fact_key(), safe_text(40)), 0..6),
    )
        .prop_map(|(summary, tags, facts)| {
            let facts: Vec<Value> = facts
                .into_iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect();
            json!({
                "schema": "agent-capsule/v1",
                "profile": { "name": "agent", "tags": tags },
                "memory": { "summary": summary, "facts": facts },
            })
        })
}
