//! Benchmarks for slug derivation and reservation.

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use preprint_forge::identity::{base_slug, topic_key, IdentityRegistry};

fn slug_benchmark(c: &mut Criterion) {
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();
    let topic = "Quantum noise: mitigation strategies for near-term superconducting devices!";

    c.bench_function("base_slug", |b| b.iter(|| base_slug(black_box(topic), date)));
    c.bench_function("topic_key", |b| b.iter(|| topic_key(black_box(topic))));
    c.bench_function("reserve_collision_chain", |b| {
        b.iter(|| {
            let registry = IdentityRegistry::in_memory();
            for _ in 0..20 {
                black_box(registry.reserve_on(topic, None, date).ok());
            }
        });
    });
}

criterion_group!(benches, slug_benchmark);
criterion_main!(benches);
