//! # Reconciliation Benchmarks
//!
//! Performance benchmarks for packsync-core reconciliation and signatures.
//!
//! Run with: `cargo bench -p packsync-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use packsync_core::{
    AttributeSchema, MemoryStore, PackDefinition, PackSync, ResourceSpec, SchemaRegistry, Scope,
    SyncConfig, reconcile,
};
use serde_json::json;
use std::hint::black_box;

fn schema() -> SchemaRegistry {
    let mut schema = SchemaRegistry::builtin();
    schema.register_class("mgmt.catalog.Box", AttributeSchema::new(["size", "label"]));
    schema
}

/// A pack with `size` components chained by DependsOn, each with a monitor.
fn chain_pack(size: usize) -> PackDefinition {
    let mut pack = PackDefinition {
        name: "bench".to_string(),
        description: "benchmark pack".to_string(),
        ..PackDefinition::default()
    };
    for i in 0..size {
        let mut resource = ResourceSpec {
            cookbook: "box".to_string(),
            ..ResourceSpec::default()
        };
        resource.attributes.insert("size".to_string(), json!(i));
        resource
            .monitors
            .insert(format!("check{}", i % 4), Default::default());
        pack.resources.insert(format!("box{i:05}"), resource);
        if i > 0 {
            pack.depends_on
                .entry(format!("box{i:05}"))
                .or_default()
                .insert(format!("box{:05}", i - 1), Default::default());
        }
    }
    pack
}

fn scope() -> Scope {
    Scope {
        ns_path: "/public/bench/packs/bench/1".to_string(),
        environment: "_default".to_string(),
        package: "mgmt.catalog",
        version: "1".to_string(),
        register: "bench".to_string(),
        comments: "bench".to_string(),
    }
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_reconcile_fresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_fresh");

    for size in [10, 100, 500].iter() {
        let pack = chain_pack(*size);
        let resources = pack.resources_for("_default");
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut store = MemoryStore::new(schema());
                let report = reconcile(&mut store, &scope(), &pack, &resources).expect("reconcile");
                black_box(report)
            });
        });
    }

    group.finish();
}

fn bench_reconcile_rerun(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_rerun");

    for size in [10, 100, 500].iter() {
        let pack = chain_pack(*size);
        let resources = pack.resources_for("_default");
        let mut store = MemoryStore::new(schema());
        reconcile(&mut store, &scope(), &pack, &resources).expect("seed");
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(reconcile(&mut store, &scope(), &pack, &resources).expect("reconcile")));
        });
    }

    group.finish();
}

fn bench_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature");

    for size in [10, 100, 1000].iter() {
        let pack = chain_pack(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(pack.signature().expect("signature")));
        });
    }

    group.finish();
}

fn bench_unchanged_sync(c: &mut Criterion) {
    let pack = chain_pack(100);
    let mut sync = PackSync::new(MemoryStore::new(schema()), SyncConfig::new("bench", "1"));
    sync.register().expect("register");
    sync.sync_pack(&pack).expect("seed");

    c.bench_function("sync_unchanged_100", |b| {
        b.iter(|| black_box(sync.sync_pack(&pack).expect("sync")));
    });
}

criterion_group!(
    benches,
    bench_reconcile_fresh,
    bench_reconcile_rerun,
    bench_signature,
    bench_unchanged_sync
);
criterion_main!(benches);
