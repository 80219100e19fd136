use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Aggregate, CommandHandler, DomainError, DomainEvent};
use event_store::{InMemoryEventStore, Version};
use saga::{SagaCoordinator, SagaMetadata};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
enum StockEvent {
    Reserved { sku: String, quantity: u32 },
}

impl DomainEvent for StockEvent {
    fn event_type(&self) -> &'static str {
        "StockReserved"
    }
}

#[derive(Debug, Default)]
struct Stock {
    reserved: u32,
    version: Version,
}

#[derive(Debug, thiserror::Error)]
#[error("never rejected")]
struct Never;

impl From<Never> for DomainError {
    fn from(e: Never) -> Self {
        DomainError::rejected("Stock", e)
    }
}

impl Aggregate for Stock {
    type Event = StockEvent;
    type Error = Never;

    fn aggregate_type() -> &'static str {
        "Stock"
    }

    fn id(&self) -> Option<AggregateId> {
        None
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        let StockEvent::Reserved { quantity, .. } = event;
        self.reserved += quantity;
    }
}

fn reserve(_: &Stock) -> Result<Vec<StockEvent>, Never> {
    Ok(vec![StockEvent::Reserved {
        sku: "SKU-1".to_string(),
        quantity: 1,
    }])
}

fn bench_execute_plain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/execute_plain", |b| {
        b.iter(|| {
            rt.block_on(async {
                let handler: CommandHandler<_, Stock> =
                    CommandHandler::new(InMemoryEventStore::new());
                handler.execute(AggregateId::new(), reserve).await.unwrap();
            });
        });
    });
}

fn bench_execute_with_metadata(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let context = SagaCoordinator::launch("fulfilment", "place-order");
    let metadata = SagaMetadata::from(
        SagaCoordinator::given(&context)
            .perform_step("fulfilment", "reserve-stock")
            .unwrap(),
    );

    c.bench_function("domain/execute_with_metadata", |b| {
        b.iter(|| {
            rt.block_on(async {
                let handler: CommandHandler<_, Stock> =
                    CommandHandler::new(InMemoryEventStore::new());
                handler
                    .execute_with_metadata(AggregateId::new(), Some(&metadata), reserve)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_load_100_events(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let handler: CommandHandler<_, Stock> = CommandHandler::new(InMemoryEventStore::new());
    let id = AggregateId::new();
    rt.block_on(async {
        for _ in 0..100 {
            handler.execute(id, reserve).await.unwrap();
        }
    });

    c.bench_function("domain/load_100_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let stock = handler.load(id).await.unwrap();
                assert_eq!(stock.reserved, 100);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_execute_plain,
    bench_execute_with_metadata,
    bench_load_100_events,
);
criterion_main!(benches);
