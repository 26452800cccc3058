//! The subscription registry.
//!
//! Owns closure subscriptions, the handler-type table built from a [`HandlerCatalog`],
//! the invocation cache those handler types are dispatched through, and the set of event
//! types this endpoint is interested in. Mutated during configuration only; the bus
//! reads it through a shared reference afterwards.

use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::catalog::{HandlerCatalog, HandlerDescriptor, HandlerResolver};
use crate::codec::MessageCodec;
use crate::error::{BusError, BusResult};
use crate::invocation::HandlerInvocationCache;
use crate::message::{Command, Event, Message, MessageIntent, message_type_id, type_name_of};
use crate::subscription::{
    CommandSubscription, EventSubscription, HandlerResult, ResolvedSubscription, Subscription,
};

#[derive(Default)]
pub struct JitneySubscriptions {
    commands: HashMap<TypeId, Arc<dyn Subscription>>,
    events: HashMap<TypeId, Vec<Arc<dyn Subscription>>>,
    handler_types: HashMap<TypeId, Vec<HandlerDescriptor>>,
    subscribed_events: Vec<(TypeId, &'static str)>,
    cache: Arc<HandlerInvocationCache>,
    resolver: Option<Arc<dyn HandlerResolver>>,
    codec: MessageCodec,
}

impl JitneySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the single closure handler for command type `C`.
    pub fn add_command_handler<C, F, Fut>(&mut self, handler: F) -> BusResult<()>
    where
        C: Command + DeserializeOwned,
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let message_type = TypeId::of::<C>();
        if self.commands.contains_key(&message_type) || self.handler_types.contains_key(&message_type) {
            return Err(BusError::DuplicateSubscription(type_name_of::<C>().to_string()));
        }

        self.commands
            .insert(message_type, Arc::new(CommandSubscription::new(handler)));
        self.codec.register::<C>();
        debug!(message_type = type_name_of::<C>(), "command handler registered");
        Ok(())
    }

    /// Add a closure handler for event type `E`; every registered handler fires.
    pub fn add_event_handler<E, F, Fut>(&mut self, handler: F)
    where
        E: Event + DeserializeOwned,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.events
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Arc::new(EventSubscription::new(handler)));
        self.codec.register::<E>();
        self.note_subscribed_event(TypeId::of::<E>(), type_name_of::<E>());
        debug!(message_type = type_name_of::<E>(), "event handler registered");
    }

    /// Install every handler type listed in `catalog`.
    ///
    /// `register` is invoked once per distinct handler type so an external container
    /// can register it too. Two handler types claiming the same command type, or a handler
    /// type claiming a command that already has a closure, is a `DuplicateSubscription`.
    pub fn scan_for_message_handlers<F>(&mut self, catalog: &HandlerCatalog, mut register: F) -> BusResult<()>
    where
        F: FnMut(&HandlerDescriptor),
    {
        let mut seen_handlers: Vec<TypeId> = Vec::new();

        for descriptor in catalog.descriptors() {
            let is_command = descriptor.intent() == MessageIntent::Command;
            if is_command && self.commands.contains_key(&descriptor.message_type()) {
                return Err(BusError::DuplicateSubscription(descriptor.message_name().to_string()));
            }
            let claimed = self.handler_types.entry(descriptor.message_type()).or_default();
            if claimed.iter().any(|d| d.handler_type() == descriptor.handler_type()) {
                continue;
            }
            if is_command && !claimed.is_empty() {
                return Err(BusError::DuplicateSubscription(descriptor.message_name().to_string()));
            }
            claimed.push(*descriptor);

            descriptor.install(Arc::make_mut(&mut self.cache));
            descriptor.register_codec(&mut self.codec);
            if descriptor.intent() == MessageIntent::Event {
                self.note_subscribed_event(descriptor.message_type(), descriptor.message_name());
            }

            if !seen_handlers.contains(&descriptor.handler_type()) {
                seen_handlers.push(descriptor.handler_type());
                register(descriptor);
            }
        }

        debug!(
            handler_types = seen_handlers.len(),
            pairings = self.cache.len(),
            "scanned message handlers"
        );
        Ok(())
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn HandlerResolver>) {
        self.resolver = Some(resolver);
    }

    /// The one subscription that handles `command`.
    ///
    /// A closure wins over a resolved handler type. Registration already refuses to let
    /// both exist for one command, so in practice exactly one is found.
    pub fn get_command_subscription(&self, command: &dyn Message) -> BusResult<Arc<dyn Subscription>> {
        let message_type = message_type_id(command);
        if let Some(subscription) = self.commands.get(&message_type) {
            return Ok(subscription.clone());
        }

        self.resolved(message_type, command.message_type())
            .into_iter()
            .next()
            .ok_or_else(|| BusError::NoSubscriptionFound(command.message_type().to_string()))
    }

    /// Every subscription for `event`: closures first, then resolved handler types.
    pub fn get_event_subscriptions(&self, event: &dyn Message) -> Vec<Arc<dyn Subscription>> {
        let message_type = message_type_id(event);
        let mut subscriptions: Vec<Arc<dyn Subscription>> =
            self.events.get(&message_type).cloned().unwrap_or_default();
        subscriptions.extend(self.resolved(message_type, event.message_type()));
        subscriptions
    }

    /// Fully-qualified names of every event type subscribed so far, in registration order.
    pub fn get_subscribed_event_types(&self) -> Vec<&'static str> {
        self.subscribed_events.iter().map(|(_, name)| *name).collect()
    }

    /// Whether some local handler (closure or handler type) exists for `message_type`.
    pub fn handles(&self, message_type: TypeId) -> bool {
        self.commands.contains_key(&message_type)
            || self.events.contains_key(&message_type)
            || self.handler_types.contains_key(&message_type)
    }

    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut MessageCodec {
        &mut self.codec
    }

    pub fn invocation_cache(&self) -> &HandlerInvocationCache {
        &self.cache
    }

    fn resolved(&self, message_type: TypeId, message_name: &'static str) -> Vec<Arc<dyn Subscription>> {
        let (Some(descriptors), Some(resolver)) = (self.handler_types.get(&message_type), &self.resolver) else {
            return Vec::new();
        };

        descriptors
            .iter()
            .filter_map(|descriptor| {
                let instance = resolver.resolve(descriptor.handler_type());
                if instance.is_none() {
                    debug!(
                        handler = descriptor.handler_name(),
                        "handler type could not be resolved"
                    );
                }
                instance
            })
            .map(|instance| {
                Arc::new(ResolvedSubscription::new(
                    instance,
                    self.cache.clone(),
                    message_type,
                    message_name,
                )) as Arc<dyn Subscription>
            })
            .collect()
    }

    fn note_subscribed_event(&mut self, message_type: TypeId, name: &'static str) {
        if !self.subscribed_events.iter().any(|(id, _)| *id == message_type) {
            self.subscribed_events.push((message_type, name));
        }
    }
}
