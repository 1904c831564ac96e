//! Benchmarks for the synchronization store primitive and rule evaluation.
use apex_sched::engine::CronRule;
use apex_sched::sync::{InMemoryStore, SyncStore, SynchronizedClock};
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn bench_set_greater_than(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_memory_set_greater_than");
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("advancing", |b| {
        let store = InMemoryStore::new();
        let mut value = 0_i64;
        b.iter(|| {
            value += 1;
            rt.block_on(async { black_box(store.set_greater_than("clock:bench", value).await.unwrap()) });
        });
    });

    group.bench_function("losing", |b| {
        let store = InMemoryStore::new();
        rt.block_on(async { store.set("clock:bench", i64::MAX).await.unwrap() });
        b.iter(|| {
            rt.block_on(async { black_box(store.set_greater_than("clock:bench", 1).await.unwrap()) });
        });
    });

    group.finish();
}

fn bench_contended_clock(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_clock");
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();

    for replicas in [2_usize, 8, 32] {
        group.throughput(Throughput::Elements(replicas as u64));
        group.bench_with_input(BenchmarkId::from_parameter(replicas), &replicas, |b, &replicas| {
            let store: Arc<dyn SyncStore> = Arc::new(InMemoryStore::new());
            let clocks: Vec<_> = (0..replicas)
                .map(|_| SynchronizedClock::new("job:* * * * * *", store.clone()))
                .collect();
            let mut tick = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

            b.iter(|| {
                tick += chrono::Duration::seconds(1);
                rt.block_on(async {
                    let handles: Vec<_> = clocks
                        .iter()
                        .cloned()
                        .map(|clock| tokio::spawn(async move { clock.set(tick).await }))
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_rule_next_after(c: &mut Criterion) {
    let mut group = c.benchmark_group("cron_rule_next_after");
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

    for rule in ["* * * * * *", "0 */5 * * * *", "0 30 2 1 * Mon"] {
        let parsed = CronRule::parse(rule).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(rule), &parsed, |b, r| {
            b.iter(|| black_box(r.next_after(&from)));
        });
    }

    group.bench_function("parse", |b| {
        b.iter(|| black_box(CronRule::parse("0 */5 * * * *").unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_set_greater_than, bench_contended_clock, bench_rule_next_after);
criterion_main!(benches);
