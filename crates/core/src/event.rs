//! Versioned domain events and event histories.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A domain event emitted by an event-sourced aggregate.
///
/// Events are facts: immutable, serialisable (they are persisted as payloads) and
/// cheap enough to clone when they are dispatched after persistence.
pub trait DomainEvent: Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable event type name stored next to the payload.
    fn event_type(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

/// A domain event stamped with the aggregate version it produced.
///
/// Created exactly once per applied event and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionableEvent<E> {
    version: i64,
    event: E,
}

impl<E> VersionableEvent<E> {
    pub fn new(version: i64, event: E) -> Self {
        Self { version, event }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn into_event(self) -> E {
        self.event
    }
}

/// Ordered, finite and restartable sequence of versioned events.
///
/// An empty history is a distinguishable state: it means the stream holds no events
/// in the requested range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHistory<E> {
    events: Vec<VersionableEvent<E>>,
}

impl<E> EventHistory<E> {
    pub fn empty() -> Self {
        Self { events: Vec::new() }
    }

    /// Build a history, rejecting versions that do not strictly increase.
    pub fn new(events: Vec<VersionableEvent<E>>) -> DomainResult<Self> {
        let mut last: Option<i64> = None;
        for e in &events {
            if let Some(prev) = last {
                if e.version <= prev {
                    return Err(DomainError::invariant(format!(
                        "event history is not strictly increasing (last={prev}, found={})",
                        e.version
                    )));
                }
            }
            last = Some(e.version);
        }
        Ok(Self { events })
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Version of the newest event, if any.
    pub fn last_version(&self) -> Option<i64> {
        self.events.last().map(|e| e.version)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionableEvent<E>> {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<VersionableEvent<E>> {
        self.events
    }
}

impl<E> Default for EventHistory<E> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, E> IntoIterator for &'a EventHistory<E> {
    type Item = &'a VersionableEvent<E>;
    type IntoIter = core::slice::Iter<'a, VersionableEvent<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_distinguishable() {
        let history: EventHistory<u32> = EventHistory::empty();
        assert!(history.is_empty());
        assert_eq!(history.last_version(), None);
    }

    #[test]
    fn history_can_be_iterated_more_than_once() {
        let history = EventHistory::new(vec![
            VersionableEvent::new(0, "a"),
            VersionableEvent::new(1, "b"),
        ])
        .unwrap();

        let first: Vec<_> = history.iter().map(|e| *e.event()).collect();
        let second: Vec<_> = history.iter().map(|e| *e.event()).collect();
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(first, second);
        assert_eq!(history.last_version(), Some(1));
    }

    #[test]
    fn rejects_non_increasing_versions() {
        let err = EventHistory::new(vec![
            VersionableEvent::new(3, ()),
            VersionableEvent::new(3, ()),
        ])
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
