//! Benchmarks for list property edits with and without a lock scope.
//!
//! Run with: `cargo bench --package asyncfx-property --bench locked_list_bench`
//!
//! A lock scope coalesces same-kind edits into one notification, so the
//! locked variants should scale with the edit count alone while the unlocked
//! ones also pay one listener dispatch per edit.

use asyncfx_property::{ListProperty, ObservableList, PropertyMetadata};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

const SIZES: [usize; 3] = [16, 256, 4096];

fn listened_list() -> (ListProperty<usize>, asyncfx_property::Subscription) {
    let list = ListProperty::new(
        PropertyMetadata::builder()
            .name("bench")
            .initial_value(Some(ObservableList::new()))
            .root(true)
            .build(),
    );
    let sub = list.add_list_change_listener(|change| {
        black_box(change.len());
    });
    (list, sub)
}

// ============================================================================
// Adds
// ============================================================================

fn bench_adds(c: &mut Criterion) {
    let mut group = c.benchmark_group("list/add");
    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("unlocked", size), &size, |b, &size| {
            b.iter_batched(listened_list, |(list, _sub)| {
                for i in 0..size {
                    list.add(black_box(i)).unwrap();
                }
            }, BatchSize::SmallInput);
        });

        group.bench_with_input(BenchmarkId::new("locked", size), &size, |b, &size| {
            b.iter_batched(listened_list, |(list, _sub)| {
                let mut view = list.lock().unwrap();
                for i in 0..size {
                    view.add(black_box(i)).unwrap();
                }
            }, BatchSize::SmallInput);
        });
    }
    group.finish();
}

// ============================================================================
// Mixed edits
// ============================================================================

fn bench_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("list/add_then_clear");
    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("locked", size), &size, |b, &size| {
            b.iter_batched(listened_list, |(list, _sub)| {
                let mut view = list.lock().unwrap();
                for i in 0..size {
                    view.add(black_box(i)).unwrap();
                }
                view.clear().unwrap();
            }, BatchSize::SmallInput);
        });

        group.bench_with_input(BenchmarkId::new("content_bound", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let (source, sub) = listened_list();
                    let mirror: ListProperty<usize> = ListProperty::with_items(Vec::new());
                    mirror.bind_content(&source).unwrap();
                    (source, mirror, sub)
                },
                |(source, mirror, _sub)| {
                    {
                        let mut view = source.lock().unwrap();
                        for i in 0..size {
                            view.add(black_box(i)).unwrap();
                        }
                    }
                    black_box(mirror.len());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_adds, bench_mixed);
criterion_main!(benches);
