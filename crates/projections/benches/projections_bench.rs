use common::{AggregateId, TraceContext};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{Aggregate, WalletAggregate};
use event_store::{AppendOptions, EventEnvelope, EventStore, InMemoryEventStore};
use projections::{InMemoryWalletReadStore, WalletProjector};
use rust_decimal::Decimal;

fn wallet_stream(credits: usize) -> (AggregateId, Vec<EventEnvelope>) {
    let trace = TraceContext::new_root();
    let mut wallet = WalletAggregate::new();
    let id = wallet.id();
    wallet
        .create_wallet(Decimal::from(1_000), "opening", "u", "a", id.to_string(), &trace)
        .unwrap();
    for _ in 0..credits {
        wallet
            .credit_wallet("W2", Decimal::new(1050, 2), "in", &trace)
            .unwrap();
    }
    (id, wallet.take_uncommitted())
}

fn bench_handle_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("projections/handle_stream");

    for len in [10, 100] {
        let (_, events) = wallet_stream(len - 1);
        group.bench_with_input(BenchmarkId::from_parameter(len), &events, |b, events| {
            b.iter(|| {
                rt.block_on(async {
                    let projector = WalletProjector::new(InMemoryWalletReadStore::new());
                    for event in events {
                        projector.handle(event).await.unwrap();
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_duplicate_skip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (_, events) = wallet_stream(1);
    let projector = WalletProjector::new(InMemoryWalletReadStore::new());
    rt.block_on(async {
        for event in &events {
            projector.handle(event).await.unwrap();
        }
    });

    c.bench_function("projections/duplicate_skip", |b| {
        b.iter(|| rt.block_on(projector.handle(&events[1])).unwrap());
    });
}

fn bench_rebuild(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = InMemoryEventStore::new();
    rt.block_on(async {
        for _ in 0..50 {
            let (_, events) = wallet_stream(9);
            log.append(events, AppendOptions::expect_new()).await.unwrap();
        }
    });
    let projector = WalletProjector::new(InMemoryWalletReadStore::new());

    c.bench_function("projections/rebuild_500_events", |b| {
        b.iter(|| rt.block_on(projector.rebuild(&log)).unwrap());
    });
}

criterion_group!(benches, bench_handle_stream, bench_duplicate_skip, bench_rebuild);
criterion_main!(benches);
