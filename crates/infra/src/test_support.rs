//! Small snapshottable aggregate shared by the unit and integration tests.

use serde::{Deserialize, Serialize};

use jitney_core::{AggregateId, AggregateRoot, DomainEvent, EventLedger, EventSourced, Snapshottable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterEvent {
    Incremented(i64),
    Reset,
}

impl DomainEvent for CounterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CounterEvent::Incremented(_) => "CounterIncremented",
            CounterEvent::Reset => "CounterReset",
        }
    }
}

jitney_events::event!(CounterEvent);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct Counter {
    id: AggregateId,
    total: i64,
    ledger: EventLedger<CounterEvent>,
}

impl Counter {
    pub fn total(&self) -> i64 {
        self.total
    }
}

impl AggregateRoot for Counter {
    type Id = AggregateId;

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> i64 {
        self.ledger.version()
    }
}

impl EventSourced for Counter {
    type Event = CounterEvent;
    const AGGREGATE_TYPE: &'static str = "counter";

    fn empty(id: AggregateId) -> Self {
        Self {
            id,
            total: 0,
            ledger: EventLedger::new(),
        }
    }

    fn when(&mut self, event: &CounterEvent) {
        match event {
            CounterEvent::Incremented(n) => self.total += n,
            CounterEvent::Reset => self.total = 0,
        }
    }

    fn ledger(&self) -> &EventLedger<CounterEvent> {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut EventLedger<CounterEvent> {
        &mut self.ledger
    }
}

impl Snapshottable for Counter {
    type Snapshot = CounterState;

    fn to_snapshot(&self) -> CounterState {
        CounterState { total: self.total }
    }

    fn from_snapshot(id: AggregateId, version: i64, snapshot: CounterState) -> Self {
        Self {
            id,
            total: snapshot.total,
            ledger: EventLedger::at_version(version),
        }
    }
}
