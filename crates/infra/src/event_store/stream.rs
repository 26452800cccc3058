//! One opened aggregate stream.

use std::sync::Arc;

use tracing::{debug, instrument};

use jitney_core::{AggregateId, DomainEvent, EventHistory, VersionableEvent};
use jitney_events::{Event, Message};

use super::dispatch::EventDispatcher;
use super::r#trait::{EventDescriptor, EventStore, EventStoreError, Headers, SnapshotDescriptor, StreamStorage};

/// An aggregate's event stream, opened on a backend.
///
/// Saves store a batch as one unit, then dispatch its events in the order given.
/// Replays return typed [`EventHistory`] values. Call [`close`](EventStream::close) to
/// release the backend's resources; dropping the stream releases them too, without
/// reporting errors.
pub struct EventStream {
    aggregate_type: String,
    aggregate_id: AggregateId,
    storage: Box<dyn StreamStorage>,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl core::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStream")
            .field("aggregate_type", &self.aggregate_type)
            .field("aggregate_id", &self.aggregate_id)
            .finish_non_exhaustive()
    }
}

/// Events stored by [`EventStream::persist`] that have not been dispatched yet.
#[derive(Default)]
pub struct PersistedBatch {
    events: Vec<(Arc<dyn Message>, EventDescriptor)>,
}

impl PersistedBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventStream {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        storage: Box<dyn StreamStorage>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            storage,
            dispatcher,
        }
    }

    /// Open the stream for `aggregate_type` / `aggregate_id` on `store`.
    pub async fn open(
        store: &dyn EventStore,
        dispatcher: Arc<dyn EventDispatcher>,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Self, EventStoreError> {
        let storage = store.open_stream(aggregate_type, aggregate_id).await?;
        Ok(Self::new(aggregate_type, aggregate_id, storage, dispatcher))
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    /// Persist `events`, then dispatch each of them.
    ///
    /// `expected_version` is the aggregate version after the events were raised, so the
    /// stream must currently end at `expected_version - events.len()`. A dispatch failure
    /// is returned after the whole batch is stored.
    pub async fn save<E>(
        &self,
        events: &[VersionableEvent<E>],
        expected_version: i64,
        headers: &Headers,
    ) -> Result<(), EventStoreError>
    where
        E: DomainEvent + Event,
    {
        let batch = self.persist(events, expected_version, headers).await?;
        self.dispatch_persisted(batch).await
    }

    /// The storage half of [`save`](EventStream::save): run the concurrency hook and store
    /// the batch as one unit. Nothing is dispatched until the returned batch is passed to
    /// [`dispatch_persisted`](EventStream::dispatch_persisted).
    #[instrument(
        skip(self, events, headers),
        fields(
            aggregate_type = %self.aggregate_type,
            aggregate_id = %self.aggregate_id,
            event_count = events.len()
        ),
        err
    )]
    pub async fn persist<E>(
        &self,
        events: &[VersionableEvent<E>],
        expected_version: i64,
        headers: &Headers,
    ) -> Result<PersistedBatch, EventStoreError>
    where
        E: DomainEvent + Event,
    {
        let original_version = expected_version - events.len() as i64;
        self.storage.check_concurrency(original_version).await?;

        let mut batch = PersistedBatch::default();
        for versioned in events {
            let descriptor =
                EventDescriptor::from_event(&self.aggregate_type, self.aggregate_id, versioned, headers)?;
            let message: Arc<dyn Message> = Arc::new(versioned.event().clone());
            batch.events.push((message, descriptor));
        }

        let descriptors = batch.events.iter().map(|(_, d)| d.clone()).collect();
        self.storage.append_batch(descriptors).await?;

        debug!(original_version, "events saved");
        Ok(batch)
    }

    /// Dispatch a stored batch in save order, stopping at the first failure.
    pub async fn dispatch_persisted(&self, batch: PersistedBatch) -> Result<(), EventStoreError> {
        for (message, descriptor) in batch.events {
            self.dispatcher.dispatch(message, &descriptor).await?;
        }
        Ok(())
    }

    pub async fn replay<E: DomainEvent>(&self) -> Result<EventHistory<E>, EventStoreError> {
        self.replay_from_version(0, i64::MAX).await
    }

    /// Events with `from_version <= version <= to_version`.
    #[instrument(skip(self), fields(aggregate_type = %self.aggregate_type, aggregate_id = %self.aggregate_id), err)]
    pub async fn replay_from_version<E: DomainEvent>(
        &self,
        from_version: i64,
        to_version: i64,
    ) -> Result<EventHistory<E>, EventStoreError> {
        let descriptors = self.storage.read(from_version, to_version).await?;
        let events = descriptors
            .iter()
            .map(|descriptor| descriptor.decode::<E>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventHistory::new(events)?)
    }

    /// Events newer than `snapshot`.
    pub async fn replay_from_snapshot<E: DomainEvent>(
        &self,
        snapshot: &SnapshotDescriptor,
    ) -> Result<EventHistory<E>, EventStoreError> {
        self.replay_from_version(snapshot.version + 1, i64::MAX).await
    }

    pub async fn has_snapshot(&self) -> Result<bool, EventStoreError> {
        self.storage.has_snapshot().await
    }

    pub async fn latest_snapshot(&self) -> Result<Option<SnapshotDescriptor>, EventStoreError> {
        self.storage.latest_snapshot().await
    }

    #[instrument(
        skip(self, snapshot),
        fields(aggregate_type = %self.aggregate_type, aggregate_id = %self.aggregate_id, version = snapshot.version),
        err
    )]
    pub async fn save_snapshot(&self, snapshot: SnapshotDescriptor) -> Result<(), EventStoreError> {
        if snapshot.aggregate_type != self.aggregate_type || snapshot.aggregate_id != self.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "snapshot for {}/{} saved on stream {}/{}",
                snapshot.aggregate_type, snapshot.aggregate_id, self.aggregate_type, self.aggregate_id
            )));
        }
        self.storage.append_snapshot(snapshot).await
    }

    pub async fn close(self) -> Result<(), EventStoreError> {
        self.storage.close().await
    }
}
