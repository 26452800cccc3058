//! Message model: commands, events and subscription announcements.

use std::any::{Any, TypeId};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::address::EndpointAddress;

/// What a message asks of its receiver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageIntent {
    Command,
    Event,
    SubscriptionMessage,
    Unknown,
}

impl core::fmt::Display for MessageIntent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            MessageIntent::Command => "command",
            MessageIntent::Event => "event",
            MessageIntent::SubscriptionMessage => "subscription-message",
            MessageIntent::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Anything that can travel inside an envelope.
///
/// Implement it with the [`command!`](crate::command) or [`event!`](crate::event)
/// macros, which also pick the matching intent.
pub trait Message: Any + Send + Sync + core::fmt::Debug {
    /// Fully-qualified type name, used as the wire discriminator.
    fn message_type(&self) -> &'static str {
        core::any::type_name::<Self>()
    }

    fn intent(&self) -> MessageIntent;

    /// Serialised body for wire transports.
    fn to_payload(&self) -> Result<JsonValue, serde_json::Error>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A request for exactly one handler to act.
pub trait Command: Message {}

/// A fact any number of handlers may react to.
pub trait Event: Message {}

/// Runtime type of the concrete message behind a trait object.
pub fn message_type_id(message: &dyn Message) -> TypeId {
    message.as_any().type_id()
}

/// Wire name of a message type without an instance at hand.
pub fn type_name_of<M: Message>() -> &'static str {
    core::any::type_name::<M>()
}

/// Recover the concrete message type from a shared trait object.
pub fn downcast_message<M: Message>(message: Arc<dyn Message>) -> Option<Arc<M>> {
    message.into_any().downcast::<M>().ok()
}

/// Announces that `handling_endpoint` handles events of `message_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    handling_endpoint: EndpointAddress,
    message_type: String,
}

impl SubscriptionMessage {
    pub fn new(handling_endpoint: EndpointAddress, message_type: impl Into<String>) -> Self {
        Self {
            handling_endpoint,
            message_type: message_type.into(),
        }
    }

    pub fn handling_endpoint(&self) -> &EndpointAddress {
        &self.handling_endpoint
    }

    /// Fully-qualified name of the subscribed event type.
    pub fn subscribed_type(&self) -> &str {
        &self.message_type
    }
}

crate::__impl_message!(SubscriptionMessage, crate::MessageIntent::SubscriptionMessage);

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}

#[doc(hidden)]
#[macro_export]
macro_rules! __impl_message {
    ($t:ty, $intent:expr) => {
        impl $crate::Message for $t {
            fn intent(&self) -> $crate::MessageIntent {
                $intent
            }

            fn to_payload(
                &self,
            ) -> ::core::result::Result<
                $crate::message::__private::serde_json::Value,
                $crate::message::__private::serde_json::Error,
            > {
                $crate::message::__private::serde_json::to_value(self)
            }

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn into_any(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::sync::Arc<dyn ::core::any::Any + Send + Sync> {
                self
            }
        }
    };
}

/// Implement [`Command`](crate::Command) (and `Message`) for serialisable types.
///
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// struct PlaceOrder { sku: String }
/// jitney_events::command!(PlaceOrder);
/// ```
#[macro_export]
macro_rules! command {
    ($($t:ty),+ $(,)?) => {
        $(
            $crate::__impl_message!($t, $crate::MessageIntent::Command);
            impl $crate::Command for $t {}
        )+
    };
}

/// Implement [`Event`](crate::Event) (and `Message`) for serialisable types.
#[macro_export]
macro_rules! event {
    ($($t:ty),+ $(,)?) => {
        $(
            $crate::__impl_message!($t, $crate::MessageIntent::Event);
            impl $crate::Event for $t {}
        )+
    };
}
