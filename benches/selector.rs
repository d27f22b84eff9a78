//! Benchmark for ellipsis expansion and selector compilation

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use directpv_control_plane::selector::{expand, DriveSelectorArgs};

fn bench_expand(c: &mut Criterion) {
    let mut group = c.benchmark_group("ellipsis");

    group.throughput(Throughput::Elements(1));
    group.bench_function("plain_name", |b| {
        b.iter(|| expand(black_box("node-1")));
    });

    group.throughput(Throughput::Elements(16));
    group.bench_function("numeric_range", |b| {
        b.iter(|| expand(black_box("node{1...16}")));
    });

    group.throughput(Throughput::Elements(26 * 8));
    group.bench_function("cartesian_product", |b| {
        b.iter(|| expand(black_box("rack{1...8}-sd{a...z}")));
    });

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector");
    group.throughput(Throughput::Elements(1));

    let args = DriveSelectorArgs {
        nodes: vec!["node{1...32}".into()],
        drives: vec!["/dev/sd{a...f}".into(), "nvme{0...3}n1".into()],
        statuses: vec!["ready".into(), "lost".into()],
        access_tiers: vec!["hot".into()],
        ..Default::default()
    };
    group.bench_function("drive_selector", |b| {
        b.iter(|| black_box(&args).compile());
    });

    group.finish();
}

criterion_group!(benches, bench_expand, bench_compile);
criterion_main!(benches);
