use criterion::{black_box, criterion_group, criterion_main, Criterion};
use netpoint::socket::DestinationPool;
use url::Url;

/// Pool lookup and activity bookkeeping. Pure in-memory, no network I/O.
fn benchmark_pool_operations(c: &mut Criterion) {
    let pool = DestinationPool::new().unwrap();
    let url = Url::parse("https://example.com/").unwrap();
    let manager = pool.find_or_create(&url, false).unwrap();

    c.bench_function("pool_find_or_create_hit", |b| {
        b.iter(|| {
            let found = pool.find_or_create(black_box(&url), false);
            black_box(found.unwrap())
        })
    });

    c.bench_function("pool_find_by_key", |b| {
        let key = "https://example.com:443";
        b.iter(|| black_box(pool.find(black_box(key))))
    });

    // Each pair cancels one idle timer and arms another.
    c.bench_function("destination_activate_deactivate", |b| {
        b.iter(|| {
            manager.on_activate();
            manager.on_deactivate();
        })
    });

    c.bench_function("destination_connection_limit", |b| {
        b.iter(|| black_box(manager.connection_limit()))
    });
}

criterion_group!(benches, benchmark_pool_operations);
criterion_main!(benches);
