use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreExt, InMemoryEventStore, LogPosition,
    Version,
};

fn make_event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Payment")
        .event_type("PaymentCaptured")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({
            "type": "PaymentCaptured",
            "data": { "amount": 1250 }
        }))
        .metadata(
            "saga",
            serde_json::json!({
                "kind": "named",
                "sagas": {
                    "checkout": {
                        "saga_instance_id": "00000000-0000-0000-0000-000000000001",
                        "saga_step_id": "00000000-0000-0000-0000-000000000002",
                        "step_name": "capture",
                        "prev_steps_ids": []
                    }
                }
            }),
        )
        .build()
        .unwrap()
}

fn populated_store(rt: &tokio::runtime::Runtime, aggregates: usize, per_aggregate: i64) -> InMemoryEventStore {
    let store = InMemoryEventStore::new();
    rt.block_on(async {
        for _ in 0..aggregates {
            let agg_id = AggregateId::new();
            let events: Vec<EventEnvelope> =
                (1..=per_aggregate).map(|v| make_event(agg_id, v)).collect();
            store.append(events, AppendOptions::new()).await.unwrap();
        }
    });
    store
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .append_event(make_event(AggregateId::new(), 1), AppendOptions::expect_new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_with_subscriber(c: &mut Criterion) {
    use event_store::EventBus;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let _subscription = store.subscribe_all();

    c.bench_function("event_store/append_with_subscriber", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .append_event(make_event(AggregateId::new(), 1), AppendOptions::expect_new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_get_events_for_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    rt.block_on(async {
        let events: Vec<EventEnvelope> = (1..=100).map(|v| make_event(agg_id, v)).collect();
        store.append(events, AppendOptions::new()).await.unwrap();
    });

    c.bench_function("event_store/get_events_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.get_events_for_aggregate(agg_id).await.unwrap();
            });
        });
    });
}

fn bench_stream_from_position(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = populated_store(&rt, 10, 100);

    c.bench_function("event_store/stream_1000_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let count = store.stream_all_events().await.unwrap().count().await;
                assert_eq!(count, 1000);
            });
        });
    });

    c.bench_function("event_store/stream_tail_from_900", |b| {
        b.iter(|| {
            rt.block_on(async {
                let count = store
                    .stream_all_events_from(LogPosition::new(900))
                    .await
                    .unwrap()
                    .count()
                    .await;
                assert_eq!(count, 100);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_with_subscriber,
    bench_get_events_for_aggregate,
    bench_stream_from_position,
);
criterion_main!(benches);
