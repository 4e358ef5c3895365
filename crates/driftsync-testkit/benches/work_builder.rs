use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use driftsync::work::{SharedOptions, WorkBuilder, WorkBuilderConfig};
use driftsync_core::{content_hash, Manifest};
use driftsync_testkit::{config_map, manifest_of_size};

const COUNTS: [usize; 3] = [10, 100, 1000];

fn manifests(count: usize) -> Vec<Manifest> {
    (0..count).map(|i| manifest_of_size(2048 + i % 512, 'x')).collect()
}

fn bench_pack(c: &mut Criterion) {
    let builder = WorkBuilder::new(WorkBuilderConfig::default()).expect("default config");
    let mut group = c.benchmark_group("work_builder");

    for count in COUNTS {
        let input = manifests(count);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_function(BenchmarkId::new("pack", count), |b| {
            b.iter(|| builder.pack(black_box(input.clone())))
        });

        let existing = builder
            .build("cluster1", &[], input.clone(), &SharedOptions::default())
            .to_apply;
        group.bench_function(BenchmarkId::new("rebuild_unchanged", count), |b| {
            b.iter(|| {
                builder.build(
                    "cluster1",
                    black_box(&existing),
                    input.clone(),
                    &SharedOptions::default(),
                )
            })
        });
    }

    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    let doc = config_map("app", &"v".repeat(4096)).0;
    let mut group = c.benchmark_group("canonical");
    group.throughput(Throughput::Bytes(4096));
    group.bench_function("content_hash", |b| b.iter(|| content_hash(black_box(&doc))));
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_pack, bench_hash
);

criterion_main!(benches);
