//! Aggregate root traits for event-sourced domain models.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::{DomainEvent, EventHistory, VersionableEvent};
use crate::id::AggregateId;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Version of the newest applied event.
    ///
    /// Versions start at 0 for the first event, so an aggregate that applied `n`
    /// events reports `n - 1` and a fresh aggregate reports `-1`.
    fn version(&self) -> i64;
}

/// Version counter plus the events raised since the last commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLedger<E> {
    version: i64,
    pending: Vec<VersionableEvent<E>>,
}

impl<E> EventLedger<E> {
    pub fn new() -> Self {
        Self {
            version: -1,
            pending: Vec::new(),
        }
    }

    /// Ledger for an aggregate restored from a snapshot taken at `version`.
    pub fn at_version(version: i64) -> Self {
        Self {
            version,
            pending: Vec::new(),
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn pending(&self) -> &[VersionableEvent<E>] {
        &self.pending
    }

    fn record(&mut self, event: E) {
        self.version += 1;
        self.pending.push(VersionableEvent::new(self.version, event));
    }

    fn advance_to(&mut self, version: i64) {
        self.version = version;
    }

    fn drain(&mut self) -> Vec<VersionableEvent<E>> {
        std::mem::take(&mut self.pending)
    }
}

impl<E> Default for EventLedger<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Event-sourced aggregate semantics.
///
/// - **State mutation** happens only in `when`, which must stay deterministic.
/// - **New facts** are raised with `raise`, which applies the event and records it as
///   pending with the next version.
/// - **Rehydration** replays a stored history through `when` without recording anything.
pub trait EventSourced: AggregateRoot<Id = AggregateId> + Sized + Send {
    type Event: DomainEvent;

    /// Aggregate type name used to scope streams and snapshots.
    const AGGREGATE_TYPE: &'static str;

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    fn empty(id: AggregateId) -> Self;

    /// Evolve in-memory state from a single event.
    fn when(&mut self, event: &Self::Event);

    fn ledger(&self) -> &EventLedger<Self::Event>;

    fn ledger_mut(&mut self) -> &mut EventLedger<Self::Event>;

    /// Apply a new event and record it as uncommitted.
    fn raise(&mut self, event: Self::Event) {
        self.when(&event);
        self.ledger_mut().record(event);
    }

    /// Rebuild state from stored history.
    fn replay(&mut self, history: &EventHistory<Self::Event>) {
        for versioned in history {
            self.when(versioned.event());
            self.ledger_mut().advance_to(versioned.version());
        }
    }

    fn pending_events(&self) -> &[VersionableEvent<Self::Event>] {
        self.ledger().pending()
    }

    /// Take the uncommitted events, leaving the ledger clean.
    fn commit_events(&mut self) -> Vec<VersionableEvent<Self::Event>> {
        self.ledger_mut().drain()
    }
}

/// Aggregates whose state can be captured as a point-in-time snapshot.
pub trait Snapshottable: EventSourced {
    type Snapshot: Serialize + DeserializeOwned + Send + Sync;

    fn to_snapshot(&self) -> Self::Snapshot;

    /// Restore an aggregate from a snapshot taken at `version`.
    fn from_snapshot(id: AggregateId, version: i64, snapshot: Self::Snapshot) -> Self;
}
