use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use strata_core::{key_interval, Interval, IntervalSet, Key, KeyMask};

fn fragmented_mask(intervals: i64) -> IntervalSet<i64> {
    // Every other stretch of ten keys is covered
    (0..intervals)
        .map(|i| Interval::new(i * 20, i * 20 + 10).expect("ordered bounds"))
        .collect()
}

fn bench_mask_difference(c: &mut Criterion) {
    let mask = fragmented_mask(10_000);
    let query = Interval::new(50_000, 60_000).expect("ordered bounds");

    c.bench_function("mask/difference_fragmented", |b| {
        b.iter(|| {
            let gaps = mask.difference(black_box(&query));
            black_box(gaps.len());
        });
    });

    c.bench_function("mask/contains", |b| {
        b.iter(|| black_box(mask.contains(black_box(&123_455))));
    });
}

fn bench_mask_add(c: &mut Criterion) {
    c.bench_function("mask/add_bridging", |b| {
        b.iter(|| {
            let mut mask = fragmented_mask(1_000);
            mask.add(Interval::new(5, 19_995).expect("ordered bounds"));
            black_box(mask.len());
        });
    });
}

fn bench_composite_keys(c: &mut Criterion) {
    let mut mask = KeyMask::new();
    for region in 0..200i64 {
        mask.add(key_interval((region, 0), (region, 500)).expect("ordered bounds"));
    }
    let query = key_interval(Key::from((50, 100)), Key::from((150, 0))).expect("ordered bounds");

    c.bench_function("mask/difference_composite", |b| {
        b.iter(|| black_box(mask.difference(black_box(&query)).len()));
    });
}

criterion_group!(benches, bench_mask_difference, bench_mask_add, bench_composite_keys);
criterion_main!(benches);
