//! Assignment, recording and analysis benchmarks
//!
//! Toyota Way: Genchi Genbutsu (measure, don't guess)
//!
//! Run with: cargo bench --bench assignment

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use trueno_ab::assignment::bucket_for;
use trueno_ab::experiment::{Experiment, MetricKind, MetricObservation, Variant};
use trueno_ab::AbTestEngine;

fn engine(observations_per_arm: usize) -> AbTestEngine {
    let engine = AbTestEngine::builder().build().unwrap();
    engine
        .create_experiment(
            Experiment::builder("bench", "Benchmark")
                .variant(Variant::new("control", "Control", 50.0))
                .variant(Variant::new("treatment", "Treatment", 50.0))
                .primary_metric("converted")
                .build(),
        )
        .unwrap();
    engine.start_experiment("bench").unwrap();

    for i in 0..observations_per_arm {
        for (variant, modulus) in [("control", 10), ("treatment", 8)] {
            engine
                .record_metric(
                    MetricObservation::builder(
                        "bench",
                        variant,
                        format!("{variant}-{i}"),
                        "converted",
                        if i % modulus == 0 { 1.0 } else { 0.0 },
                    )
                    .kind(MetricKind::Binary)
                    .build(),
                )
                .unwrap();
        }
    }
    engine
}

/// Raw hash bucketing cost
fn bench_bucket(c: &mut Criterion) {
    c.bench_function("bucket_for", |b| {
        b.iter(|| bucket_for(black_box("homepage-hero"), black_box("user-1234567")));
    });
}

/// Registry lookup + bucketing + variant clone
fn bench_assign(c: &mut Criterion) {
    let engine = engine(0);
    let subjects: Vec<String> = (0..1_000).map(|i| format!("user-{i}")).collect();

    let mut group = c.benchmark_group("assign_variant");
    group.throughput(Throughput::Elements(subjects.len() as u64));
    group.bench_function("1k_subjects", |b| {
        b.iter(|| {
            for subject in &subjects {
                black_box(engine.assign_variant("bench", subject).unwrap());
            }
        });
    });
    group.finish();
}

/// Upsert throughput into the sharded metrics store
fn bench_record(c: &mut Criterion) {
    let engine = engine(0);
    let mut group = c.benchmark_group("record_metric");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("1k_upserts", |b| {
        b.iter(|| {
            for i in 0..1_000 {
                engine
                    .record_metric(MetricObservation::new(
                        "bench",
                        "control",
                        format!("user-{i}"),
                        "revenue",
                        f64::from(i),
                    ))
                    .unwrap();
            }
        });
    });
    group.finish();
}

/// End-to-end analysis (gather + aggregate + test) by arm size
fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze_experiment");
    for size in [1_000, 10_000, 100_000] {
        let engine = engine(size);
        group.bench_with_input(BenchmarkId::new("two_proportion", size), &engine, |b, engine| {
            b.iter(|| {
                engine
                    .analyze_experiment(black_box("bench"), "converted", None)
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bucket, bench_assign, bench_record, bench_analyze);
criterion_main!(benches);
