use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use jitney_core::{AggregateId, DomainError, DomainEvent, Snapshottable, VersionableEvent};
use jitney_events::BusError;

/// Free-form string headers stored next to every event and snapshot.
pub type Headers = BTreeMap<String, String>;

/// A persisted event, as the storage backends see it.
///
/// The payload is the serde_json rendition of the typed domain event; `event_type`
/// names the type it was produced from so readers can pick the right decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub payload: JsonValue,
    #[serde(default)]
    pub headers: Headers,
}

impl EventDescriptor {
    /// Describe a versioned domain event for persistence.
    pub fn from_event<E: DomainEvent>(
        aggregate_type: &str,
        aggregate_id: AggregateId,
        event: &VersionableEvent<E>,
        headers: &Headers,
    ) -> Result<Self, EventStoreError> {
        Ok(Self {
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            version: event.version(),
            timestamp: Utc::now(),
            event_type: event.event().event_type().to_string(),
            payload: serde_json::to_value(event.event())?,
            headers: headers.clone(),
        })
    }

    /// Decode the payload back into the typed event.
    pub fn decode<E: DomainEvent>(&self) -> Result<VersionableEvent<E>, EventStoreError> {
        let event: E = serde_json::from_value(self.payload.clone())?;
        Ok(VersionableEvent::new(self.version, event))
    }
}

/// Point-in-time state of one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub snapshot_type: String,
    pub payload: JsonValue,
    #[serde(default)]
    pub headers: Headers,
}

impl SnapshotDescriptor {
    /// Capture the current state of `aggregate` at its current version.
    pub fn capture<A: Snapshottable>(aggregate: &A, headers: &Headers) -> Result<Self, EventStoreError> {
        Ok(Self {
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            aggregate_id: *aggregate.id(),
            version: aggregate.version(),
            timestamp: Utc::now(),
            snapshot_type: core::any::type_name::<A::Snapshot>().to_string(),
            payload: serde_json::to_value(aggregate.to_snapshot())?,
            headers: headers.clone(),
        })
    }

    pub fn decode<S: DeserializeOwned>(&self) -> Result<S, EventStoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Event store operation error.
///
/// - **Concurrency**: the backend's persisted version does not match the version the
///   caller started from. Surfaced to the caller, never retried here.
/// - **AggregateNotFound**: no snapshot and no events for the requested aggregate.
/// - **Dispatch**: the events were persisted but publishing one of them failed.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate '{aggregate_type}' with id {aggregate_id} not found")]
    AggregateNotFound {
        aggregate_type: String,
        aggregate_id: AggregateId,
    },

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("event dispatch failed: {0}")]
    Dispatch(#[from] BusError),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl EventStoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Storage behind one opened stream, scoped to a single aggregate type and id.
///
/// Versions are inclusive on both ends of [`read`](StreamStorage::read).
#[async_trait]
pub trait StreamStorage: Send + Sync {
    /// Verify that the newest persisted version equals `original_version`.
    ///
    /// Backends without concurrency control keep the default, which accepts everything.
    async fn check_concurrency(&self, original_version: i64) -> Result<(), EventStoreError> {
        let _ = original_version;
        Ok(())
    }

    async fn append(&self, event: EventDescriptor) -> Result<(), EventStoreError>;

    /// Persist `events` in order as one unit.
    ///
    /// The default appends them one at a time. Backends that can should override it so a
    /// failure leaves none of the batch stored.
    async fn append_batch(&self, events: Vec<EventDescriptor>) -> Result<(), EventStoreError> {
        for event in events {
            self.append(event).await?;
        }
        Ok(())
    }

    async fn read(&self, from_version: i64, to_version: i64) -> Result<Vec<EventDescriptor>, EventStoreError>;

    async fn latest_snapshot(&self) -> Result<Option<SnapshotDescriptor>, EventStoreError>;

    async fn has_snapshot(&self) -> Result<bool, EventStoreError> {
        Ok(self.latest_snapshot().await?.is_some())
    }

    async fn append_snapshot(&self, snapshot: SnapshotDescriptor) -> Result<(), EventStoreError>;

    /// Release whatever the stream holds.
    async fn close(&self) -> Result<(), EventStoreError> {
        Ok(())
    }
}

/// Persistence backend.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn open_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Box<dyn StreamStorage>, EventStoreError>;

    /// Every stored event across all aggregates, in insertion order.
    async fn replay_all(&self) -> Result<Vec<EventDescriptor>, EventStoreError>;
}

pub(crate) fn require_aggregate_type(aggregate_type: &str) -> Result<(), EventStoreError> {
    if aggregate_type.trim().is_empty() {
        return Err(DomainError::validation("aggregate type must not be empty").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Deposited {
        amount: i64,
    }

    impl DomainEvent for Deposited {
        fn event_type(&self) -> &'static str {
            "Deposited"
        }
    }

    #[test]
    fn descriptor_carries_version_type_and_headers() {
        let id = AggregateId::new();
        let mut headers = Headers::new();
        headers.insert("user".into(), "ada".into());

        let descriptor =
            EventDescriptor::from_event("account", id, &VersionableEvent::new(4, Deposited { amount: 10 }), &headers)
                .unwrap();

        assert_eq!(descriptor.aggregate_type, "account");
        assert_eq!(descriptor.aggregate_id, id);
        assert_eq!(descriptor.version, 4);
        assert_eq!(descriptor.event_type, "Deposited");
        assert_eq!(descriptor.payload, serde_json::json!({ "amount": 10 }));
        assert_eq!(descriptor.headers.get("user").map(String::as_str), Some("ada"));

        let decoded: VersionableEvent<Deposited> = descriptor.decode().unwrap();
        assert_eq!(decoded.version(), 4);
        assert_eq!(decoded.event(), &Deposited { amount: 10 });
    }

    #[test]
    fn decoding_into_the_wrong_type_is_a_serialization_error() {
        let descriptor = EventDescriptor {
            aggregate_type: "account".into(),
            aggregate_id: AggregateId::new(),
            version: 0,
            timestamp: Utc::now(),
            event_type: "Deposited".into(),
            payload: serde_json::json!({ "unexpected": true }),
            headers: Headers::new(),
        };

        let err = descriptor.decode::<Deposited>().unwrap_err();
        assert!(matches!(err, EventStoreError::Serialization(_)));
    }

    #[test]
    fn blank_aggregate_type_is_rejected() {
        assert!(matches!(
            require_aggregate_type("  "),
            Err(EventStoreError::Domain(DomainError::Validation(_)))
        ));
        assert!(require_aggregate_type("account").is_ok());
    }
}
