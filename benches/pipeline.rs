use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use tessera::iter::to_array;
use tessera::{ops, Column, ElemKind, Engine};

const N: i64 = 100_000;

fn engine_with_data() -> (Engine, Column) {
    let engine = Engine::builder().in_memory().unwrap();
    let col = engine.create_column("v", ElemKind::Int64, false).unwrap();
    for i in 0..N {
        col.append((i * 7 + i % 13) % 1000).unwrap();
    }
    (engine, col)
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("int64", |b| {
        b.iter(|| {
            let engine = Engine::builder().in_memory().unwrap();
            let col = engine.create_column("v", ElemKind::Int64, false).unwrap();
            for i in 0..N {
                col.append(black_box(i)).unwrap();
            }
        })
    });
    group.finish();
}

fn bench_scan_sum(c: &mut Criterion) {
    let (_engine, col) = engine_with_data();
    let mut group = c.benchmark_group("scan_sum");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("int64", |b| {
        b.iter(|| {
            let scan = Box::new(col.scan::<i64>(0, -1).unwrap());
            let mut total = ops::sum(scan);
            black_box(to_array(total.as_mut()).unwrap())
        })
    });
    group.finish();
}

fn bench_window_sum(c: &mut Criterion) {
    let (_engine, col) = engine_with_data();
    let mut group = c.benchmark_group("window_sum");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("interval_20", |b| {
        b.iter(|| {
            let scan = Box::new(col.scan::<i64>(0, -1).unwrap());
            let mut out = ops::window_sum(scan, 20).unwrap();
            black_box(to_array(out.as_mut()).unwrap())
        })
    });
    group.finish();
}

fn bench_sort(c: &mut Criterion) {
    let (_engine, col) = engine_with_data();
    let mut group = c.benchmark_group("sort");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("int64", |b| {
        b.iter(|| {
            let scan = Box::new(col.scan::<i64>(0, -1).unwrap());
            let mut out = ops::sort(scan, ops::SortOrder::Asc);
            black_box(to_array(out.as_mut()).unwrap())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_append, bench_scan_sum, bench_window_sum, bench_sort);
criterion_main!(benches);
