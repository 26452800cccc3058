//! Handler invocation cache.
//!
//! Maps a handler's runtime type to type-erased invocation thunks, one per message
//! type the handler was registered for. Thunks are built once at configuration time,
//! so dispatching to a resolved handler is a map lookup plus a downcast.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, try_join_all};
use tracing::debug;

use crate::message::{Message, downcast_message, message_type_id, type_name_of};
use crate::subscription::{HandlerResult, Handles};

/// A type-erased handler instance, as produced by a handler resolver.
#[derive(Clone)]
pub struct HandlerInstance {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl HandlerInstance {
    pub fn new<H: Send + Sync + 'static>(handler: Arc<H>) -> Self {
        Self {
            type_id: TypeId::of::<H>(),
            type_name: core::any::type_name::<H>(),
            value: handler,
        }
    }

    /// Runtime type of the wrapped handler.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast<H: Send + Sync + 'static>(&self) -> Option<Arc<H>> {
        self.value.clone().downcast::<H>().ok()
    }
}

impl core::fmt::Debug for HandlerInstance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerInstance")
            .field("type_name", &self.type_name)
            .finish()
    }
}

type Thunk = Arc<dyn Fn(HandlerInstance, Arc<dyn Message>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
struct Invoker {
    message_type: TypeId,
    thunk: Thunk,
}

/// Compiled invocation thunks keyed by handler type.
#[derive(Clone, Default)]
pub struct HandlerInvocationCache {
    by_handler: HashMap<TypeId, Vec<Invoker>>,
}

impl HandlerInvocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache the thunk for `H` handling `M`.
    ///
    /// Returns `false` when that pairing was already cached.
    pub fn add<H, M>(&mut self) -> bool
    where
        H: Handles<M>,
        M: Message,
    {
        let invokers = self.by_handler.entry(TypeId::of::<H>()).or_default();
        let message_type = TypeId::of::<M>();
        if invokers.iter().any(|i| i.message_type == message_type) {
            return false;
        }

        let thunk: Thunk = Arc::new(|instance: HandlerInstance, message: Arc<dyn Message>| {
            Box::pin(async move {
                let handler = instance.downcast::<H>().ok_or_else(|| {
                    anyhow::anyhow!(
                        "handler instance '{}' is not a '{}'",
                        instance.type_name(),
                        core::any::type_name::<H>()
                    )
                })?;
                let typed = downcast_message::<M>(message).ok_or_else(|| {
                    anyhow::anyhow!("message is not a '{}'", type_name_of::<M>())
                })?;
                <H as Handles<M>>::handle(handler.as_ref(), typed).await
            }) as BoxFuture<'static, HandlerResult>
        });

        invokers.push(Invoker { message_type, thunk });
        true
    }

    /// Whether a thunk exists for this handler instance and message type.
    pub fn handles(&self, instance: &HandlerInstance, message_type: TypeId) -> bool {
        self.by_handler
            .get(&instance.type_id())
            .is_some_and(|invokers| invokers.iter().any(|i| i.message_type == message_type))
    }

    pub fn len(&self) -> usize {
        self.by_handler.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every thunk registered for the instance's type that matches the message.
    ///
    /// Matches run concurrently and are all awaited; the first failure is returned.
    /// A handler with no matching registration is a silent no-op.
    pub async fn invoke(&self, instance: &HandlerInstance, message: Arc<dyn Message>) -> HandlerResult {
        let message_type = message_type_id(message.as_ref());
        let calls: Vec<_> = self
            .by_handler
            .get(&instance.type_id())
            .into_iter()
            .flatten()
            .filter(|i| i.message_type == message_type)
            .map(|i| (i.thunk)(instance.clone(), message.clone()))
            .collect();

        if calls.is_empty() {
            if cfg!(debug_assertions) {
                debug!(
                    handler = instance.type_name(),
                    message_type = message.message_type(),
                    "no invocation registered for handler/message pair"
                );
            }
            return Ok(());
        }

        try_join_all(calls).await?;
        Ok(())
    }
}
