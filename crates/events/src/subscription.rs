//! Subscriptions: bindings between a message type and something that handles it.

use std::any::TypeId;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::invocation::{HandlerInstance, HandlerInvocationCache};
use crate::message::{Command, Event, Message, downcast_message, message_type_id, type_name_of};

/// Outcome of running one handler. Handler failures are user-defined.
pub type HandlerResult = anyhow::Result<()>;

/// The typed "handle async" capability implemented by handler types.
///
/// A handler type may implement it for several message types; each pairing is
/// registered with a [`HandlerCatalog`](crate::HandlerCatalog).
#[async_trait]
pub trait Handles<M: Message>: Send + Sync + 'static {
    async fn handle(&self, message: Arc<M>) -> HandlerResult;
}

/// A registered handler binding for one message type.
#[async_trait]
pub trait Subscription: Send + Sync {
    fn message_type(&self) -> TypeId;

    fn message_type_name(&self) -> &'static str;

    fn can_handle(&self, message: &dyn Message) -> bool {
        message_type_id(message) == self.message_type()
    }

    async fn handle(&self, message: Arc<dyn Message>) -> HandlerResult;
}

impl dyn Subscription {
    pub fn can_handle_type<T: Message>(&self) -> bool {
        self.message_type() == TypeId::of::<T>()
    }
}

type HandlerFn<M> = Arc<dyn Fn(Arc<M>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

fn boxed_handler<M, F, Fut>(handler: F) -> HandlerFn<M>
where
    M: Message,
    F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |message| Box::pin(handler(message)))
}

async fn call_typed<M: Message>(handler: &HandlerFn<M>, message: Arc<dyn Message>) -> HandlerResult {
    match downcast_message::<M>(message) {
        Some(typed) => handler(typed).await,
        None => anyhow::bail!(
            "subscription for '{}' received a message of another type",
            type_name_of::<M>()
        ),
    }
}

/// The single closure handler for command type `C`.
pub struct CommandSubscription<C: Command> {
    handler: HandlerFn<C>,
}

impl<C: Command> CommandSubscription<C> {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            handler: boxed_handler(handler),
        }
    }
}

#[async_trait]
impl<C: Command> Subscription for CommandSubscription<C> {
    fn message_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn message_type_name(&self) -> &'static str {
        type_name_of::<C>()
    }

    async fn handle(&self, message: Arc<dyn Message>) -> HandlerResult {
        call_typed(&self.handler, message).await
    }
}

/// One closure handler for event type `E`; any number may exist per type.
pub struct EventSubscription<E: Event> {
    handler: HandlerFn<E>,
}

impl<E: Event> EventSubscription<E> {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            handler: boxed_handler(handler),
        }
    }
}

#[async_trait]
impl<E: Event> Subscription for EventSubscription<E> {
    fn message_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn message_type_name(&self) -> &'static str {
        type_name_of::<E>()
    }

    async fn handle(&self, message: Arc<dyn Message>) -> HandlerResult {
        call_typed(&self.handler, message).await
    }
}

/// A handler instance obtained from a [`HandlerResolver`](crate::HandlerResolver),
/// invoked through the invocation cache.
pub struct ResolvedSubscription {
    instance: HandlerInstance,
    cache: Arc<HandlerInvocationCache>,
    message_type: TypeId,
    message_type_name: &'static str,
}

impl ResolvedSubscription {
    pub fn new(
        instance: HandlerInstance,
        cache: Arc<HandlerInvocationCache>,
        message_type: TypeId,
        message_type_name: &'static str,
    ) -> Self {
        Self {
            instance,
            cache,
            message_type,
            message_type_name,
        }
    }
}

#[async_trait]
impl Subscription for ResolvedSubscription {
    fn message_type(&self) -> TypeId {
        self.message_type
    }

    fn message_type_name(&self) -> &'static str {
        self.message_type_name
    }

    fn can_handle(&self, message: &dyn Message) -> bool {
        self.cache
            .handles(&self.instance, message_type_id(message))
    }

    async fn handle(&self, message: Arc<dyn Message>) -> HandlerResult {
        self.cache.invoke(&self.instance, message).await
    }
}
