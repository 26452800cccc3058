use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use jitney_core::{AggregateId, AggregateRoot, DomainEvent, EventLedger, EventSourced, Snapshottable};
use jitney_events::{EndpointAddress, Jitney, JitneyConfiguration};
use jitney_infra::{EventStoreRepository, Headers, InMemoryEventStore, NoDispatch, SnapshotStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum MeterEvent {
    Recorded(i64),
}

impl DomainEvent for MeterEvent {}
jitney_events::event!(MeterEvent);

#[derive(Debug, Serialize, Deserialize)]
struct Record(i64);
jitney_events::command!(Record);

#[derive(Debug, Clone)]
struct Meter {
    id: AggregateId,
    reading: i64,
    ledger: EventLedger<MeterEvent>,
}

impl AggregateRoot for Meter {
    type Id = AggregateId;

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> i64 {
        self.ledger.version()
    }
}

impl EventSourced for Meter {
    type Event = MeterEvent;
    const AGGREGATE_TYPE: &'static str = "meter";

    fn empty(id: AggregateId) -> Self {
        Self {
            id,
            reading: 0,
            ledger: EventLedger::new(),
        }
    }

    fn when(&mut self, event: &MeterEvent) {
        match event {
            MeterEvent::Recorded(n) => self.reading += n,
        }
    }

    fn ledger(&self) -> &EventLedger<MeterEvent> {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut EventLedger<MeterEvent> {
        &mut self.ledger
    }
}

impl Snapshottable for Meter {
    type Snapshot = i64;

    fn to_snapshot(&self) -> i64 {
        self.reading
    }

    fn from_snapshot(id: AggregateId, version: i64, reading: i64) -> Self {
        Self {
            id,
            reading,
            ledger: EventLedger::at_version(version),
        }
    }
}

/// Store one meter with `events` events, saved in batches of 50.
fn seeded(rt: &Runtime, repo: &EventStoreRepository, events: i64) -> AggregateId {
    let id = AggregateId::new();
    let mut meter = Meter::empty(id);
    rt.block_on(async {
        for n in 0..events {
            meter.raise(MeterEvent::Recorded(n));
            if meter.pending_events().len() == 50 {
                repo.save(&mut meter, &Headers::new()).await.unwrap();
            }
        }
        repo.save(&mut meter, &Headers::new()).await.unwrap();
    });
    id
}

fn bench_rehydration(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("rehydration");

    for events in [100i64, 1_000, 5_000] {
        let full = EventStoreRepository::new(Arc::new(InMemoryEventStore::new()), Arc::new(NoDispatch))
            .with_default_strategy(SnapshotStrategy::new(i64::MAX).unwrap());
        let full_id = seeded(&rt, &full, events);
        group.bench_with_input(BenchmarkId::new("full_replay", events), &full_id, |b, id| {
            b.iter(|| rt.block_on(async { black_box(full.get_by_id::<Meter>(*id).await.unwrap()) }));
        });

        let snapshotted = EventStoreRepository::new(Arc::new(InMemoryEventStore::new()), Arc::new(NoDispatch))
            .with_default_strategy(SnapshotStrategy::new(100).unwrap());
        let snap_id = seeded(&rt, &snapshotted, events);
        group.bench_with_input(BenchmarkId::new("snapshot_replay", events), &snap_id, |b, id| {
            b.iter(|| rt.block_on(async { black_box(snapshotted.get_by_id::<Meter>(*id).await.unwrap()) }));
        });
    }

    group.finish();
}

fn bench_send_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut config = JitneyConfiguration::new();
    config.with_local_endpoint(EndpointAddress::new("meters", "bench").unwrap());
    config
        .add_command_handler(|cmd: Arc<Record>| async move {
            black_box(cmd.0);
            Ok(())
        })
        .unwrap();
    let bus = Jitney::direct(config).unwrap();
    rt.block_on(bus.start()).unwrap();

    c.bench_function("direct_bus_send", |b| {
        b.iter(|| rt.block_on(bus.send(Record(black_box(7)))).unwrap());
    });
}

criterion_group!(benches, bench_rehydration, bench_send_latency);
criterion_main!(benches);
