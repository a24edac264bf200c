//! Allocation hot-path benchmarks
//!
//! Benchmarks for the per-request visitor path:
//! - Visitor id hashing
//! - Weighted variation selection
//! - Sticky lookup of an existing assignment
//!
//! Measure before optimizing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::distributions::Alphanumeric;
use rand::{rngs::StdRng, Rng, SeedableRng};
use trueno_ab::allocation::{bucket_hash, select_variation};
use trueno_ab::model::{ExperimentConfig, Goal, Variation, VariationConfig, VariationStats};
use trueno_ab::store::MemoryStore;
use trueno_ab::targeting::RequestContext;
use trueno_ab::ExperimentOrchestrator;

/// Random visitor ids, reproducible across runs
fn visitor_ids(count: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            (0..16)
                .map(|_| char::from(rng.sample(Alphanumeric)))
                .collect()
        })
        .collect()
}

/// Variations with equal weights
#[allow(clippy::cast_precision_loss)]
fn variations(count: u64) -> Vec<Variation> {
    (1..=count)
        .map(|id| Variation {
            id,
            experiment_id: 1,
            key: format!("v{id}"),
            name: format!("Variation {id}"),
            changes: serde_json::Value::Null,
            traffic_percentage: 100.0 / count as f64,
            is_control: id == 1,
            is_winner: false,
            stats: VariationStats::default(),
        })
        .collect()
}

fn bench_bucket_hash(c: &mut Criterion) {
    let ids = visitor_ids(1_000);
    c.bench_function("bucket_hash_1k_visitors", |b| {
        b.iter(|| {
            ids.iter()
                .fold(0u64, |acc, id| acc ^ bucket_hash(black_box(id)))
        });
    });
}

fn bench_select_variation(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_variation");
    let ids = visitor_ids(1_000);

    for count in [2u64, 4, 16] {
        let arms = variations(count);
        group.bench_with_input(BenchmarkId::new("arms", count), &arms, |b, arms| {
            b.iter(|| {
                ids.iter()
                    .filter_map(|id| select_variation(black_box(arms), id))
                    .count()
            });
        });
    }

    group.finish();
}

fn bench_sticky_lookup(c: &mut Criterion) {
    let engine = ExperimentOrchestrator::builder(MemoryStore::new())
        .build()
        .expect("engine");
    let id = engine
        .create_experiment(
            ExperimentConfig::builder("bench")
                .variation(VariationConfig::new("a", "A").traffic_percentage(50.0))
                .variation(VariationConfig::new("b", "B").traffic_percentage(50.0))
                .goal(Goal::new("g", "signup"))
                .build(),
        )
        .expect("create");
    engine.start_experiment(id).expect("start");

    let ids = visitor_ids(1_000);
    let context = RequestContext::default();
    for visitor in &ids {
        engine
            .get_user_variation(id, visitor, &context)
            .expect("assign");
    }

    c.bench_function("get_user_variation_assigned_1k", |b| {
        b.iter(|| {
            for visitor in &ids {
                black_box(engine.get_user_variation(id, visitor, &context).ok());
            }
        });
    });
}

criterion_group!(
    benches,
    bench_bucket_hash,
    bench_select_variation,
    bench_sticky_lookup
);
criterion_main!(benches);
