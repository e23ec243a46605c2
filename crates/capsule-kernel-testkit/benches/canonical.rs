//! Benchmarks for canonicalization, cursors and envelope verification.
//!
//! Run with: `cargo bench -p capsule-kernel-testkit`

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

use capsule_kernel_core::{canonicalize, cursor, feed_cursor, Envelope, FeedCursorEntry};
use capsule_kernel_policy::{scan, validate_capsule, SafetyConfig, TierLimits};
use capsule_kernel_testkit::fixtures::{content_hash, TestAgent};

/// A schema-valid payload with `facts` memory entries.
fn payload_with_facts(facts: usize) -> Value {
    let facts: Vec<Value> = (0..facts)
        .map(|i| json!({"key": format!("fact.{i}"), "value": format!("value number {i}")}))
        .collect();
    json!({
        "schema": "agent-capsule/v1",
        "profile": {"name": "bench", "tags": ["a", "b", "c"]},
        "memory": {"summary": "benchmark payload", "facts": facts},
    })
}

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");
    for facts in [0usize, 10, 50] {
        let payload = payload_with_facts(facts);
        group.throughput(Throughput::Bytes(canonicalize(&payload).len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(facts), &payload, |b, p| {
            b.iter(|| cursor(black_box(p)))
        });
    }
    group.finish();
}

fn bench_policy(c: &mut Criterion) {
    let payload = payload_with_facts(50);
    let limits = TierLimits::elevated();
    let safety = SafetyConfig::default();
    c.bench_function("validate_capsule/50", |b| {
        b.iter(|| validate_capsule(black_box(&payload), &limits))
    });
    c.bench_function("safety_scan/50", |b| b.iter(|| scan(black_box(&payload), &safety)));
}

fn bench_verify(c: &mut Criterion) {
    let agent = TestAgent::with_seed(1);
    let envelope: Envelope = agent.envelope(0, payload_with_facts(10));
    c.bench_function("envelope_verify", |b| {
        b.iter(|| black_box(envelope.clone()).verify())
    });
}

fn bench_feed_cursor(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed_cursor");
    for items in [10usize, 200] {
        let rows: Vec<(String, String, String)> = (0..items)
            .map(|i| {
                let id = format!("item-{i}");
                (format!("source-{}", i % 4), content_hash(&id), id)
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(items), &rows, |b, rows| {
            b.iter(|| {
                feed_cursor(rows.iter().map(|(source, hash, id)| FeedCursorEntry {
                    source,
                    id,
                    content_hash: hash,
                }))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_canonicalize, bench_policy, bench_verify, bench_feed_cursor);
criterion_main!(benches);
