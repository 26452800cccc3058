//! Handler discovery table and the handler-resolution seam.
//!
//! Handler types are listed once at start-up in a [`HandlerCatalog`]; the registry turns
//! that list into invocation thunks and a message-type → handler-type table. Instances
//! are produced on demand by a [`HandlerResolver`] (a DI container, or the bundled
//! [`InstanceRegistry`]).

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::codec::MessageCodec;
use crate::invocation::{HandlerInstance, HandlerInvocationCache};
use crate::message::{Command, Event, Message, MessageIntent, type_name_of};
use crate::subscription::Handles;

/// One `(handler type, message type)` pairing found in a catalog.
#[derive(Clone, Copy)]
pub struct HandlerDescriptor {
    handler_type: TypeId,
    handler_name: &'static str,
    message_type: TypeId,
    message_name: &'static str,
    intent: MessageIntent,
    install: fn(&mut HandlerInvocationCache) -> bool,
    register_codec: fn(&mut MessageCodec),
}

impl HandlerDescriptor {
    fn of<H, M>(intent: MessageIntent) -> Self
    where
        H: Handles<M>,
        M: Message + DeserializeOwned,
    {
        Self {
            handler_type: TypeId::of::<H>(),
            handler_name: core::any::type_name::<H>(),
            message_type: TypeId::of::<M>(),
            message_name: type_name_of::<M>(),
            intent,
            install: |cache| cache.add::<H, M>(),
            register_codec: |codec| {
                codec.register::<M>();
            },
        }
    }

    pub fn handler_type(&self) -> TypeId {
        self.handler_type
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    pub fn message_type(&self) -> TypeId {
        self.message_type
    }

    pub fn message_name(&self) -> &'static str {
        self.message_name
    }

    pub fn intent(&self) -> MessageIntent {
        self.intent
    }

    pub(crate) fn install(&self, cache: &mut HandlerInvocationCache) -> bool {
        (self.install)(cache)
    }

    pub(crate) fn register_codec(&self, codec: &mut MessageCodec) {
        (self.register_codec)(codec)
    }
}

impl core::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("handler", &self.handler_name)
            .field("message", &self.message_name)
            .field("intent", &self.intent)
            .finish()
    }
}

/// Explicit list of handler types and the messages each one handles.
///
/// ```ignore
/// let mut catalog = HandlerCatalog::new();
/// catalog
///     .command::<OrderHandler, PlaceOrder>()
///     .event::<OrderHandler, PaymentReceived>();
/// ```
#[derive(Debug, Clone, Default)]
pub struct HandlerCatalog {
    descriptors: Vec<HandlerDescriptor>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command<H, C>(&mut self) -> &mut Self
    where
        H: Handles<C>,
        C: Command + DeserializeOwned,
    {
        self.push(HandlerDescriptor::of::<H, C>(MessageIntent::Command))
    }

    pub fn event<H, E>(&mut self) -> &mut Self
    where
        H: Handles<E>,
        E: Event + DeserializeOwned,
    {
        self.push(HandlerDescriptor::of::<H, E>(MessageIntent::Event))
    }

    fn push(&mut self, descriptor: HandlerDescriptor) -> &mut Self {
        let known = self.descriptors.iter().any(|d| {
            d.handler_type == descriptor.handler_type && d.message_type == descriptor.message_type
        });
        if !known {
            self.descriptors.push(descriptor);
        }
        self
    }

    pub fn descriptors(&self) -> &[HandlerDescriptor] {
        &self.descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Produces handler instances by handler type.
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, handler_type: TypeId) -> Option<HandlerInstance>;
}

/// A map of ready-made handler instances, one per handler type.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: HashMap<TypeId, HandlerInstance>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the instance served for `H`.
    pub fn register<H: Send + Sync + 'static>(&mut self, handler: H) -> &mut Self {
        self.register_shared(Arc::new(handler))
    }

    pub fn register_shared<H: Send + Sync + 'static>(&mut self, handler: Arc<H>) -> &mut Self {
        self.instances
            .insert(TypeId::of::<H>(), HandlerInstance::new(handler));
        self
    }

    pub fn contains(&self, handler_type: TypeId) -> bool {
        self.instances.contains_key(&handler_type)
    }
}

impl HandlerResolver for InstanceRegistry {
    fn resolve(&self, handler_type: TypeId) -> Option<HandlerInstance> {
        self.instances.get(&handler_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::HandlerResult;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Ship;

    #[derive(Debug, Serialize, Deserialize)]
    struct Shipped;

    crate::command!(Ship);
    crate::event!(Shipped);

    struct Warehouse;

    #[async_trait]
    impl Handles<Ship> for Warehouse {
        async fn handle(&self, _: Arc<Ship>) -> HandlerResult {
            Ok(())
        }
    }

    #[async_trait]
    impl Handles<Shipped> for Warehouse {
        async fn handle(&self, _: Arc<Shipped>) -> HandlerResult {
            Ok(())
        }
    }

    #[test]
    fn catalog_records_each_pairing_once() {
        let mut catalog = HandlerCatalog::new();
        catalog
            .command::<Warehouse, Ship>()
            .event::<Warehouse, Shipped>()
            .command::<Warehouse, Ship>();

        let descriptors = catalog.descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].intent(), MessageIntent::Command);
        assert_eq!(descriptors[1].intent(), MessageIntent::Event);
        assert_eq!(descriptors[1].message_type(), TypeId::of::<Shipped>());
        assert!(descriptors[0].handler_name().ends_with("Warehouse"));
    }

    #[test]
    fn registry_resolves_by_handler_type() {
        let mut registry = InstanceRegistry::new();
        registry.register(Warehouse);

        let instance = registry.resolve(TypeId::of::<Warehouse>()).unwrap();
        assert_eq!(instance.type_id(), TypeId::of::<Warehouse>());
        assert!(instance.downcast::<Warehouse>().is_some());
        assert!(registry.resolve(TypeId::of::<Ship>()).is_none());
    }
}
