//! `jitney-core`: domain foundation for event-sourced aggregates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, versioned events and the aggregate traits
//! the event store rehydrates.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, EventLedger, EventSourced, Snapshottable};
pub use error::{DomainError, DomainResult};
pub use event::{DomainEvent, EventHistory, VersionableEvent};
pub use id::{AggregateId, CorrelationId, MessageId};
pub use value_object::ValueObject;
