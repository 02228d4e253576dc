//! Benchmark: Binding Evaluation
//!
//! Measures map building, key normalization and bulk evaluation.
//! Run: cargo bench --bench binding_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use faceplate::ast::Binding;
use faceplate::binding::{make_expression_key, BindingMap, BindingMode};
use faceplate::event::NoopEmitter;
use faceplate::runtime::Engine;
use faceplate::store::{FieldValue, MemoryStore};
use faceplate::RuntimeConfig;
use std::sync::Arc;

fn bindings(count: usize) -> Vec<Binding> {
    (0..count)
        .map(|i| match i % 4 {
            0 => Binding::new(format!("g{}", i), "value", format!("F{}", i % 16)),
            1 => Binding::new(format!("c{}", i), "value", format!("F{} * 1.8 + 32", i % 16)),
            2 => Binding::new(format!("t{}", i), "text", format!("'label {}'", i)),
            _ => Binding::new(
                format!("s{}", i),
                "value",
                format!("script: return helpers.round(context.get('F{}') / 3, 2);", i % 16),
            ),
        })
        .collect()
}

fn engine() -> Arc<Engine> {
    let store = MemoryStore::new();
    store.insert_entity("e-1", "Thing");
    for f in 0..16 {
        store.set("e-1", &format!("F{}", f), FieldValue::Float(f as f64 * 1.5));
    }
    let engine = Engine::new(Arc::new(store), RuntimeConfig::default(), Arc::new(NoopEmitter::new()));
    engine.set_entity_id(Some("e-1"));
    engine
}

fn bench_key_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression_key");

    group.bench_function("simple", |b| {
        b.iter(|| black_box(make_expression_key(black_box("Temperature"), BindingMode::Field)));
    });

    group.bench_function("padded_path", |b| {
        b.iter(|| {
            black_box(make_expression_key(
                black_box("  Parent   ->  Site ->   Name  "),
                BindingMode::Field,
            ))
        });
    });

    group.finish();
}

fn bench_map_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("binding_map");
    let small = bindings(40);
    let large = bindings(400);

    group.bench_function("build_40", |b| b.iter(|| black_box(BindingMap::build(black_box(&small)))));
    group.bench_function("build_400", |b| b.iter(|| black_box(BindingMap::build(black_box(&large)))));

    group.finish();
}

fn bench_evaluate_all(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("evaluate_all");

    for count in [40, 400] {
        let engine = engine();
        engine.rebuild(&bindings(count));
        group.bench_function(format!("bindings_{}", count), |b| {
            b.to_async(&rt).iter(|| engine.evaluate_all());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_key_normalization, bench_map_build, bench_evaluate_all);
criterion_main!(benches);
