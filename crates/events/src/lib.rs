//! Jitney message bus.
//!
//! Commands and events travel in [`Envelope`]s through four middleware pipelines to
//! closure handlers or to handler types resolved per message. See [`bus`] for the flow.

pub mod address;
pub mod bus;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod in_memory_queue;
pub mod invocation;
pub mod message;
pub mod pipeline;
pub mod registry;
pub mod subscription;
pub mod subscription_store;
pub mod summary;
pub mod transport;

pub use address::EndpointAddress;
pub use bus::{BusState, Jitney};
pub use catalog::{HandlerCatalog, HandlerDescriptor, HandlerResolver, InstanceRegistry};
pub use codec::MessageCodec;
pub use config::JitneyConfiguration;
pub use envelope::{Envelope, HeaderValue};
pub use error::{BusError, BusResult};
pub use in_memory_queue::{InMemoryQueue, InMemoryQueueTransport};
pub use invocation::{HandlerInstance, HandlerInvocationCache};
pub use message::{Command, Event, Message, MessageIntent, SubscriptionMessage};
pub use pipeline::{Next, Pipeline, PipelineStep};
pub use registry::JitneySubscriptions;
pub use subscription::{HandlerResult, Handles, Subscription};
pub use subscription_store::{InMemorySubscriptionStore, SubscriptionStore};
pub use transport::{EnvelopeCallback, Transport, TransportError};
