use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use idempotency_guard::idempotency::{
    AcquireResult, IdempotencyCoordinator, IdempotencyPolicy, InMemoryRecordStore, KeyNormalizer,
    Outcome, RecordStore, ResultCodec,
};
use idempotency_guard::observability::{mask_key, LatencyTimer};

fn benchmark_key_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_normalization");
    let normalizer = KeyNormalizer::default();

    for len in [16usize, 64, 1024].iter() {
        let raw: String = "k".repeat(*len);
        group.bench_with_input(BenchmarkId::new("sha256_scope", len), &raw, |b, raw| {
            b.iter(|| black_box(normalizer.normalize(black_box("payments"), black_box(raw))));
        });
    }

    group.bench_function("mask_key", |b| {
        b.iter(|| black_box(mask_key(black_box("req-6f1c2a9e-31d4"))));
    });

    group.finish();
}

fn benchmark_memory_store(c: &mut Criterion) {
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to build runtime: {}", e),
    };
    let mut group = c.benchmark_group("memory_store");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("acquire_complete", |b| {
        let store = InMemoryRecordStore::new();
        let outcome = Outcome::new(200, serde_json::json!({"transactionId": "TXN-1"}));
        let mut n: u64 = 0;

        b.to_async(&rt).iter(|| {
            n += 1;
            let key = format!("bench:{}", n);
            let store = &store;
            let outcome = &outcome;
            async move {
                if let Ok(AcquireResult::Acquired(owner)) =
                    store.try_acquire(&key, Duration::from_secs(60)).await
                {
                    let _ = store
                        .complete(&key, &owner, outcome, Duration::from_secs(60))
                        .await;
                }
            }
        });
    });

    group.bench_function("conflict_on_completed", |b| {
        let store = InMemoryRecordStore::new();
        rt.block_on(async {
            if let Ok(AcquireResult::Acquired(owner)) =
                store.try_acquire("hot", Duration::from_secs(600)).await
            {
                let _ = store
                    .complete("hot", &owner, &Outcome::empty(204), Duration::from_secs(600))
                    .await;
            }
        });

        b.to_async(&rt)
            .iter(|| async { black_box(store.try_acquire("hot", Duration::from_secs(600)).await) });
    });

    group.finish();
}

fn benchmark_coordinator_replay(c: &mut Criterion) {
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to build runtime: {}", e),
    };
    let coordinator = IdempotencyCoordinator::with_store(Arc::new(InMemoryRecordStore::new()));
    let policy = IdempotencyPolicy::new("payments");

    rt.block_on(async {
        let _ = coordinator
            .execute_with_key(&policy, "replayed", false, || async {
                Ok::<_, std::convert::Infallible>(Outcome::new(200, serde_json::json!({"ok": true})))
            })
            .await;
    });

    c.bench_function("coordinator_replay", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                coordinator
                    .execute_with_key(&policy, "replayed", false, || async {
                        Ok::<_, std::convert::Infallible>(Outcome::empty(200))
                    })
                    .await
                    .is_ok(),
            )
        });
    });
}

fn benchmark_codec(c: &mut Criterion) {
    let codec = ResultCodec::new();
    let payload = serde_json::json!({
        "transactionId": "TXN-0d6e",
        "amount": "100.00",
        "currency": "USD",
        "items": (0..20).collect::<Vec<u32>>(),
    });

    c.bench_function("codec_payload_roundtrip", |b| {
        b.iter(|| {
            let encoded = codec.encode_payload(black_box(&payload)).unwrap_or_default();
            black_box(codec.decode_payload(&encoded).ok())
        });
    });
}

fn benchmark_latency_timer(c: &mut Criterion) {
    c.bench_function("latency_timer", |b| {
        b.iter(|| {
            let timer = LatencyTimer::new();
            black_box(timer.elapsed_ms())
        });
    });
}

criterion_group!(
    benches,
    benchmark_key_normalization,
    benchmark_memory_store,
    benchmark_coordinator_replay,
    benchmark_codec,
    benchmark_latency_timer,
);
criterion_main!(benches);
