//! Append-only event store boundary.
//!
//! A backend ([`EventStore`]) opens per-aggregate [`StreamStorage`]; [`EventStream`] wraps
//! it with typed save/replay and the post-persist [`EventDispatcher`] call.

pub mod dispatch;
pub mod in_memory;
pub mod postgres;
pub mod stream;
pub mod r#trait;

pub use dispatch::{EventDispatcher, NoDispatch};
pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use stream::{EventStream, PersistedBatch};
pub use r#trait::{EventDescriptor, EventStore, EventStoreError, Headers, SnapshotDescriptor, StreamStorage};
