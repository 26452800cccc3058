//! Post-persist dispatch of stored events.

use std::sync::Arc;

use async_trait::async_trait;

use jitney_events::{Jitney, Message};

use super::r#trait::{EventDescriptor, EventStoreError};

/// Hands a freshly persisted event to whoever reacts to it.
///
/// Called once per event, in save order, after the event has been appended.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    async fn dispatch(&self, event: Arc<dyn Message>, descriptor: &EventDescriptor) -> Result<(), EventStoreError>;
}

/// Publishes each persisted event on the bus, so event handlers run before `save` returns
/// on a direct bus.
#[async_trait]
impl EventDispatcher for Jitney {
    async fn dispatch(&self, event: Arc<dyn Message>, _descriptor: &EventDescriptor) -> Result<(), EventStoreError> {
        self.publish_message(event).await?;
        Ok(())
    }
}

/// Persist without telling anyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDispatch;

#[async_trait]
impl EventDispatcher for NoDispatch {
    async fn dispatch(&self, _event: Arc<dyn Message>, _descriptor: &EventDescriptor) -> Result<(), EventStoreError> {
        Ok(())
    }
}
