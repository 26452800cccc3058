//! Infrastructure layer: event store backends, snapshots and aggregate persistence.

pub mod event_store;
pub mod repository;
pub mod snapshot;

pub use event_store::{
    EventDescriptor, EventDispatcher, EventStore, EventStoreError, EventStream, Headers, InMemoryEventStore,
    NoDispatch, PersistedBatch, PostgresEventStore, SnapshotDescriptor, StreamStorage,
};
pub use repository::EventStoreRepository;
pub use snapshot::{DEFAULT_SNAPSHOT_THRESHOLD, SnapshotStrategy};

#[cfg(test)]
mod test_support;
