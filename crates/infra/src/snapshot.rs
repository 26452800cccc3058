//! When to snapshot an aggregate.

use jitney_core::DomainError;

use crate::event_store::EventStoreError;

pub const DEFAULT_SNAPSHOT_THRESHOLD: i64 = 100;

/// Snapshot every `threshold` events, optionally only for one aggregate type.
///
/// Versions count from 0, so with a threshold of 100 a snapshot is due once version 99
/// (the 100th event) is saved, then at 199, and so on. A save that jumps over a
/// boundary still triggers one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStrategy {
    threshold: i64,
    aggregate_type: Option<String>,
}

impl Default for SnapshotStrategy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SNAPSHOT_THRESHOLD,
            aggregate_type: None,
        }
    }
}

impl SnapshotStrategy {
    /// Strategy for every aggregate type.
    pub fn new(threshold: i64) -> Result<Self, EventStoreError> {
        if threshold <= 0 {
            return Err(DomainError::validation(format!("snapshot threshold must be positive, got {threshold}")).into());
        }
        Ok(Self {
            threshold,
            aggregate_type: None,
        })
    }

    /// Strategy that only applies to `aggregate_type`.
    pub fn for_aggregate(aggregate_type: impl Into<String>, threshold: i64) -> Result<Self, EventStoreError> {
        let aggregate_type = aggregate_type.into();
        if aggregate_type.trim().is_empty() {
            return Err(DomainError::validation("aggregate type must not be empty").into());
        }
        let mut strategy = Self::new(threshold)?;
        strategy.aggregate_type = Some(aggregate_type);
        Ok(strategy)
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn aggregate_type(&self) -> Option<&str> {
        self.aggregate_type.as_deref()
    }

    pub fn applies_to(&self, aggregate_type: &str) -> bool {
        self.aggregate_type.as_deref().is_none_or(|t| t == aggregate_type)
    }

    /// Whether moving from `previous_version` to `current_version` crossed a boundary.
    pub fn is_due(&self, previous_version: i64, current_version: i64) -> bool {
        if current_version <= previous_version {
            return false;
        }
        let before = (previous_version + 1).max(0) / self.threshold;
        let after = (current_version + 1).max(0) / self.threshold;
        after > before
    }
}
