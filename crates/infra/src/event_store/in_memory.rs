use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use jitney_core::AggregateId;

use super::r#trait::{
    EventDescriptor, EventStore, EventStoreError, SnapshotDescriptor, StreamStorage, require_aggregate_type,
};

#[derive(Debug, Default)]
struct Log {
    events: Vec<EventDescriptor>,
    snapshots: Vec<SnapshotDescriptor>,
}

/// In-memory, list-backed event store.
///
/// Intended for tests/dev. Writes are visible immediately. The concurrency check is off
/// unless enabled with [`with_concurrency_check`](InMemoryEventStore::with_concurrency_check).
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
    check_concurrency: bool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject saves whose starting version differs from the stream's newest version.
    pub fn with_concurrency_check(mut self) -> Self {
        self.check_concurrency = true;
        self
    }

    /// Number of events across all streams.
    pub fn event_count(&self) -> Result<usize, EventStoreError> {
        Ok(read_log(&self.log)?.events.len())
    }
}

fn read_log(log: &RwLock<Log>) -> Result<std::sync::RwLockReadGuard<'_, Log>, EventStoreError> {
    log.read()
        .map_err(|_| EventStoreError::storage("event store lock poisoned"))
}

fn write_log(log: &RwLock<Log>) -> Result<std::sync::RwLockWriteGuard<'_, Log>, EventStoreError> {
    log.write()
        .map_err(|_| EventStoreError::storage("event store lock poisoned"))
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn open_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Box<dyn StreamStorage>, EventStoreError> {
        require_aggregate_type(aggregate_type)?;
        Ok(Box::new(InMemoryStream {
            log: self.log.clone(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            check_concurrency: self.check_concurrency,
        }))
    }

    async fn replay_all(&self) -> Result<Vec<EventDescriptor>, EventStoreError> {
        Ok(read_log(&self.log)?.events.clone())
    }
}

struct InMemoryStream {
    log: Arc<RwLock<Log>>,
    aggregate_type: String,
    aggregate_id: AggregateId,
    check_concurrency: bool,
}

impl InMemoryStream {
    fn owns(&self, aggregate_type: &str, aggregate_id: AggregateId) -> bool {
        self.aggregate_type == aggregate_type && self.aggregate_id == aggregate_id
    }

    fn current_version(&self, log: &Log) -> i64 {
        log.events
            .iter()
            .rev()
            .find(|e| self.owns(&e.aggregate_type, e.aggregate_id))
            .map(|e| e.version)
            .unwrap_or(-1)
    }
}

#[async_trait]
impl StreamStorage for InMemoryStream {
    async fn check_concurrency(&self, original_version: i64) -> Result<(), EventStoreError> {
        if !self.check_concurrency {
            return Ok(());
        }
        let log = read_log(&self.log)?;
        let current = self.current_version(&log);
        if current != original_version {
            return Err(EventStoreError::Concurrency(format!(
                "stream {}/{} is at version {current}, save started from {original_version}",
                self.aggregate_type, self.aggregate_id
            )));
        }
        Ok(())
    }

    async fn append(&self, event: EventDescriptor) -> Result<(), EventStoreError> {
        self.append_batch(vec![event]).await
    }

    async fn append_batch(&self, events: Vec<EventDescriptor>) -> Result<(), EventStoreError> {
        if let Some(event) = events.iter().find(|e| !self.owns(&e.aggregate_type, e.aggregate_id)) {
            return Err(EventStoreError::InvalidAppend(format!(
                "event for {}/{} appended to stream {}/{}",
                event.aggregate_type, event.aggregate_id, self.aggregate_type, self.aggregate_id
            )));
        }

        let mut log = write_log(&self.log)?;
        if self.check_concurrency {
            let mut newest = self.current_version(&log);
            for event in &events {
                if event.version <= newest {
                    return Err(EventStoreError::Concurrency(format!(
                        "version {} already exists in stream {}/{}",
                        event.version, self.aggregate_type, self.aggregate_id
                    )));
                }
                newest = event.version;
            }
        }
        log.events.extend(events);
        Ok(())
    }

    async fn read(&self, from_version: i64, to_version: i64) -> Result<Vec<EventDescriptor>, EventStoreError> {
        let log = read_log(&self.log)?;
        let mut events: Vec<EventDescriptor> = log
            .events
            .iter()
            .filter(|e| self.owns(&e.aggregate_type, e.aggregate_id))
            .filter(|e| e.version >= from_version && e.version <= to_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn latest_snapshot(&self) -> Result<Option<SnapshotDescriptor>, EventStoreError> {
        let log = read_log(&self.log)?;
        Ok(log
            .snapshots
            .iter()
            .filter(|s| self.owns(&s.aggregate_type, s.aggregate_id))
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn append_snapshot(&self, snapshot: SnapshotDescriptor) -> Result<(), EventStoreError> {
        let mut log = write_log(&self.log)?;
        log.snapshots.push(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::event_store::r#trait::Headers;

    fn event(aggregate_type: &str, id: AggregateId, version: i64) -> EventDescriptor {
        EventDescriptor {
            aggregate_type: aggregate_type.into(),
            aggregate_id: id,
            version,
            timestamp: Utc::now(),
            event_type: "Ticked".into(),
            payload: serde_json::json!(version),
            headers: Headers::new(),
        }
    }

    fn snapshot(id: AggregateId, version: i64) -> SnapshotDescriptor {
        SnapshotDescriptor {
            aggregate_type: "clock".into(),
            aggregate_id: id,
            version,
            timestamp: Utc::now(),
            snapshot_type: "u32".into(),
            payload: serde_json::json!(version),
            headers: Headers::new(),
        }
    }

    #[tokio::test]
    async fn streams_are_scoped_by_type_and_id() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        let stream_a = store.open_stream("clock", a).await.unwrap();
        let stream_b = store.open_stream("clock", b).await.unwrap();
        stream_a.append(event("clock", a, 0)).await.unwrap();
        stream_a.append(event("clock", a, 1)).await.unwrap();
        stream_b.append(event("clock", b, 0)).await.unwrap();

        assert_eq!(stream_a.read(0, i64::MAX).await.unwrap().len(), 2);
        assert_eq!(stream_b.read(0, i64::MAX).await.unwrap().len(), 1);
        assert_eq!(stream_a.read(1, 1).await.unwrap()[0].version, 1);
        assert_eq!(store.replay_all().await.unwrap().len(), 3);
        assert_eq!(store.event_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn appending_a_foreign_event_is_rejected() {
        let store = InMemoryEventStore::new();
        let stream = store.open_stream("clock", AggregateId::new()).await.unwrap();

        let err = stream.append(event("clock", AggregateId::new(), 0)).await.unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[tokio::test]
    async fn concurrency_check_is_off_by_default() {
        let store = InMemoryEventStore::new();
        let stream = store.open_stream("clock", AggregateId::new()).await.unwrap();

        stream.check_concurrency(41).await.unwrap();
    }

    #[tokio::test]
    async fn strict_store_compares_against_the_newest_version() {
        let store = InMemoryEventStore::new().with_concurrency_check();
        let id = AggregateId::new();
        let stream = store.open_stream("clock", id).await.unwrap();

        stream.check_concurrency(-1).await.unwrap();
        stream.append(event("clock", id, 0)).await.unwrap();
        stream.append(event("clock", id, 1)).await.unwrap();

        stream.check_concurrency(1).await.unwrap();
        let err = stream.check_concurrency(0).await.unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));

        let err = stream.append(event("clock", id, 1)).await.unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[tokio::test]
    async fn rejected_batch_stores_nothing() {
        let store = InMemoryEventStore::new().with_concurrency_check();
        let id = AggregateId::new();
        let stream = store.open_stream("clock", id).await.unwrap();
        stream.append(event("clock", id, 0)).await.unwrap();

        let err = stream
            .append_batch(vec![event("clock", id, 1), event("clock", id, 2), event("clock", id, 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));

        let err = stream
            .append_batch(vec![event("clock", id, 1), event("clock", AggregateId::new(), 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));

        assert_eq!(store.event_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_snapshot_is_the_highest_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let stream = store.open_stream("clock", id).await.unwrap();

        assert!(!stream.has_snapshot().await.unwrap());
        stream.append_snapshot(snapshot(id, 99)).await.unwrap();
        stream.append_snapshot(snapshot(id, 199)).await.unwrap();

        let other = store.open_stream("clock", AggregateId::new()).await.unwrap();
        assert!(!other.has_snapshot().await.unwrap());

        let latest = stream.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.version, 199);
    }

    #[tokio::test]
    async fn blank_aggregate_type_cannot_open_a_stream() {
        let store = InMemoryEventStore::new();
        assert!(store.open_stream("", AggregateId::new()).await.is_err());
    }
}
