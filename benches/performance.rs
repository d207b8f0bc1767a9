//! Performance benchmarks for reconciliation and fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use shape_sync::reconcile;
use shape_sync::{
    ChangeMessage, ChannelFeed, ConnectionRegistry, OperationFilter, RegistryConfig,
    ShapeDefinition, Value,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn wide_object(fields: usize) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = (0..fields)
        .map(|i| {
            (
                format!("field_{}", i),
                json!({"id": i, "label": format!("item {}", i), "tags": ["a", "b", "c"]}),
            )
        })
        .collect();
    serde_json::Value::Object(map)
}

/// Benchmark a one-field update against objects of growing width
fn bench_reconcile_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_update");

    for width in [10, 100, 1000, 10000] {
        group.bench_with_input(BenchmarkId::new("fields", width), &width, |b, &width| {
            let base = reconcile::apply(None, &ChangeMessage::insert(wide_object(width), 1));
            let message = ChangeMessage::update(json!({"field_0": {"id": 0, "label": "x"}}), 2);

            b.iter(|| {
                black_box(reconcile::apply(Some(&base), &message));
            });
        });
    }

    group.finish();
}

/// Benchmark a full insert that is mostly equal to the cached value
fn bench_reconcile_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_insert");

    for width in [100, 1000] {
        group.bench_with_input(BenchmarkId::new("fields", width), &width, |b, &width| {
            let base = reconcile::apply(None, &ChangeMessage::insert(wide_object(width), 1));
            let mut next = wide_object(width);
            next["field_1"] = json!("changed");
            let message = ChangeMessage::insert(Value::from(next), 2);

            b.iter(|| {
                black_box(reconcile::apply(Some(&base), &message));
            });
        });
    }

    group.finish();
}

fn bench_shape_key(c: &mut Criterion) {
    let definition = ShapeDefinition::new("report")
        .param("id", "r1")
        .param("workspace", 42i64)
        .param("archived", false)
        .param("query", "name=a&b?c");

    c.bench_function("shape_key", |b| {
        b.iter(|| black_box(definition.key()));
    });
    c.bench_function("shape_handle", |b| {
        let key = definition.key();
        b.iter(|| black_box(key.handle()));
    });
}

/// Benchmark end-to-end delivery to many subscribers of one shape
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    group.measurement_time(Duration::from_secs(10));

    for subscribers in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &subscribers| {
                let feed = ChannelFeed::new();
                let registry =
                    ConnectionRegistry::new(Arc::new(feed.clone()), RegistryConfig::default())
                        .unwrap();
                let shape = ShapeDefinition::new("report").param("id", "bench");
                let key = shape.key();

                let received = Arc::new(AtomicU64::new(0));
                let handles: Vec<_> = (0..subscribers)
                    .map(|_| {
                        let received = Arc::clone(&received);
                        registry.subscribe(
                            &shape,
                            OperationFilter::all(),
                            move |_| {
                                received.fetch_add(1, Ordering::Relaxed);
                            },
                            true,
                        )
                    })
                    .collect();

                let mut sequence = 0u64;
                b.iter(|| {
                    sequence += 1;
                    let target = received.load(Ordering::Relaxed) + subscribers as u64;
                    feed.push(&key, ChangeMessage::update(json!({ "n": sequence }), sequence));
                    while received.load(Ordering::Relaxed) < target {
                        std::hint::spin_loop();
                    }
                });

                drop(handles);
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reconcile_update,
    bench_reconcile_insert,
    bench_shape_key,
    bench_fan_out,
);

criterion_main!(benches);
