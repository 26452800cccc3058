//! Aggregate persistence on top of an [`EventStore`].

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use jitney_core::{AggregateId, EventHistory, EventSourced, Snapshottable};
use jitney_events::Event;

use crate::event_store::{
    EventDispatcher, EventDescriptor, EventStore, EventStoreError, EventStream, Headers, SnapshotDescriptor,
};
use crate::snapshot::SnapshotStrategy;

/// Saves and loads event-sourced aggregates.
///
/// `save` and `get_by_id` snapshot according to the configured [`SnapshotStrategy`]s: a
/// strategy registered for the aggregate's type wins over the default one.
/// `append` and `load` do the same work for aggregates that cannot be snapshotted.
pub struct EventStoreRepository {
    store: Arc<dyn EventStore>,
    dispatcher: Arc<dyn EventDispatcher>,
    default_strategy: SnapshotStrategy,
    strategies: Vec<SnapshotStrategy>,
}

impl EventStoreRepository {
    pub fn new(store: Arc<dyn EventStore>, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            default_strategy: SnapshotStrategy::default(),
            strategies: Vec::new(),
        }
    }

    pub fn with_default_strategy(mut self, strategy: SnapshotStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Add a per-aggregate-type strategy. A later strategy for the same type replaces the
    /// earlier one; a strategy without a type replaces the default.
    pub fn with_strategy(mut self, strategy: SnapshotStrategy) -> Self {
        if strategy.aggregate_type().is_none() {
            self.default_strategy = strategy;
            return self;
        }
        self.strategies
            .retain(|existing| existing.aggregate_type() != strategy.aggregate_type());
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_for(&self, aggregate_type: &str) -> &SnapshotStrategy {
        self.strategies
            .iter()
            .find(|s| s.applies_to(aggregate_type))
            .unwrap_or(&self.default_strategy)
    }

    async fn open(&self, aggregate_type: &str, id: AggregateId) -> Result<EventStream, EventStoreError> {
        EventStream::open(self.store.as_ref(), self.dispatcher.clone(), aggregate_type, id).await
    }

    /// Persist the aggregate's pending events and commit them, without snapshotting.
    ///
    /// Returns the version the aggregate was at before the pending events. Once the events
    /// are stored they are committed on the aggregate, even when dispatching them fails
    /// afterwards and the dispatch error is returned.
    pub async fn append<A>(&self, aggregate: &mut A, headers: &Headers) -> Result<i64, EventStoreError>
    where
        A: EventSourced,
        A::Event: Event,
    {
        let (previous, dispatched) = self.persist(aggregate, headers).await?;
        dispatched.map(|()| previous)
    }

    /// Persist pending events, then snapshot if the save crossed the strategy's threshold.
    ///
    /// A dispatch failure does not prevent the snapshot; it is returned afterwards.
    pub async fn save<A>(&self, aggregate: &mut A, headers: &Headers) -> Result<(), EventStoreError>
    where
        A: Snapshottable,
        A::Event: Event,
    {
        let (previous, dispatched) = self.persist(aggregate, headers).await?;
        let current = aggregate.version();

        if self.strategy_for(A::AGGREGATE_TYPE).is_due(previous, current) {
            let snapshot = SnapshotDescriptor::capture(aggregate, headers)?;
            let stream = self.open(A::AGGREGATE_TYPE, *aggregate.id()).await?;
            stream.save_snapshot(snapshot).await?;
            stream.close().await?;
            debug!(aggregate_type = A::AGGREGATE_TYPE, version = current, "snapshot saved");
        }
        dispatched
    }

    /// Store and commit pending events. The outer error means nothing was stored; the inner
    /// one is the dispatch outcome for events that were.
    #[instrument(skip(self, aggregate, headers), fields(aggregate_type = A::AGGREGATE_TYPE, aggregate_id = %aggregate.id()), err)]
    async fn persist<A>(
        &self,
        aggregate: &mut A,
        headers: &Headers,
    ) -> Result<(i64, Result<(), EventStoreError>), EventStoreError>
    where
        A: EventSourced,
        A::Event: Event,
    {
        let current = aggregate.version();
        let pending = aggregate.pending_events().len() as i64;
        if pending == 0 {
            return Ok((current, Ok(())));
        }

        let stream = self.open(A::AGGREGATE_TYPE, *aggregate.id()).await?;
        let batch = stream.persist(aggregate.pending_events(), current, headers).await?;
        aggregate.commit_events();

        let dispatched = stream.dispatch_persisted(batch).await;
        if let Err(err) = &dispatched {
            warn!(error = %err, "events stored but dispatch failed");
        }
        stream.close().await?;
        Ok((current - pending, dispatched))
    }

    /// Rebuild an aggregate from its full history.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    pub async fn load<A: EventSourced>(&self, id: AggregateId) -> Result<A, EventStoreError> {
        let stream = self.open(A::AGGREGATE_TYPE, id).await?;
        let history: EventHistory<A::Event> = stream.replay().await?;
        stream.close().await?;

        if history.is_empty() {
            return Err(not_found::<A>(id));
        }
        let mut aggregate = A::empty(id);
        aggregate.replay(&history);
        Ok(aggregate)
    }

    /// Rebuild an aggregate from its latest snapshot plus newer events, or from its full
    /// history when it has no snapshot.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE, from_snapshot), err)]
    pub async fn get_by_id<A: Snapshottable>(&self, id: AggregateId) -> Result<A, EventStoreError> {
        let stream = self.open(A::AGGREGATE_TYPE, id).await?;

        let aggregate = match stream.latest_snapshot().await? {
            Some(snapshot) => {
                tracing::Span::current().record("from_snapshot", true);
                let mut aggregate = A::from_snapshot(id, snapshot.version, snapshot.decode()?);
                let newer: EventHistory<A::Event> = stream.replay_from_snapshot(&snapshot).await?;
                aggregate.replay(&newer);
                Some(aggregate)
            }
            None => {
                tracing::Span::current().record("from_snapshot", false);
                let history: EventHistory<A::Event> = stream.replay().await?;
                if history.is_empty() {
                    None
                } else {
                    let mut aggregate = A::empty(id);
                    aggregate.replay(&history);
                    Some(aggregate)
                }
            }
        };
        stream.close().await?;

        aggregate.ok_or_else(|| not_found::<A>(id))
    }

    /// Every stored event, for rebuilding projections.
    pub async fn rebuild_all(&self) -> Result<Vec<EventDescriptor>, EventStoreError> {
        self.store.replay_all().await
    }
}

fn not_found<A: EventSourced>(id: AggregateId) -> EventStoreError {
    EventStoreError::AggregateNotFound {
        aggregate_type: A::AGGREGATE_TYPE.to_string(),
        aggregate_id: id,
    }
}
