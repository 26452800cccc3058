//! Where remote interest in event types is recorded.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::address::EndpointAddress;
use crate::error::BusResult;
use crate::message::SubscriptionMessage;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Record the announcement. Saving the same endpoint/type pair again is a no-op.
    async fn save(&self, subscription: &SubscriptionMessage) -> BusResult<()>;

    /// Endpoints subscribed to the event type named `message_type`.
    async fn subscribed_endpoints(&self, message_type: &str) -> BusResult<Vec<EndpointAddress>>;
}

#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    by_type: RwLock<BTreeMap<String, BTreeSet<EndpointAddress>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored (event type, endpoint) pairs.
    pub async fn len(&self) -> usize {
        self.by_type.read().await.values().map(BTreeSet::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn save(&self, subscription: &SubscriptionMessage) -> BusResult<()> {
        self.by_type
            .write()
            .await
            .entry(subscription.subscribed_type().to_string())
            .or_default()
            .insert(subscription.handling_endpoint().clone());
        Ok(())
    }

    async fn subscribed_endpoints(&self, message_type: &str) -> BusResult<Vec<EndpointAddress>> {
        Ok(self
            .by_type
            .read()
            .await
            .get(message_type)
            .map(|endpoints| endpoints.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(q: &str) -> EndpointAddress {
        EndpointAddress::new(q, "host").unwrap()
    }

    #[tokio::test]
    async fn saving_twice_keeps_one_entry() {
        let store = InMemorySubscriptionStore::new();
        let announcement = SubscriptionMessage::new(addr("billing"), "MyEvent");

        store.save(&announcement).await.unwrap();
        store.save(&announcement).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.subscribed_endpoints("MyEvent").await.unwrap(), vec![addr("billing")]);
    }

    #[tokio::test]
    async fn endpoints_are_grouped_by_type() {
        let store = InMemorySubscriptionStore::new();
        store.save(&SubscriptionMessage::new(addr("a"), "E1")).await.unwrap();
        store.save(&SubscriptionMessage::new(addr("b"), "E1")).await.unwrap();
        store.save(&SubscriptionMessage::new(addr("a"), "E2")).await.unwrap();

        assert_eq!(store.subscribed_endpoints("E1").await.unwrap().len(), 2);
        assert_eq!(store.subscribed_endpoints("E2").await.unwrap(), vec![addr("a")]);
        assert!(store.subscribed_endpoints("E3").await.unwrap().is_empty());
    }
}
