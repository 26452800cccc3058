//! Transport capability consumed by the bus.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::address::EndpointAddress;
use crate::envelope::Envelope;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no queue is bound to endpoint '{0}'")]
    UnknownEndpoint(EndpointAddress),

    #[error("transport is not connected")]
    NotConnected,

    #[error("transport already connected as '{0}'")]
    AlreadyConnected(EndpointAddress),

    #[error("envelope has no usable recipient: {0}")]
    MissingRecipient(String),

    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Called once per envelope arriving at the connected endpoint.
///
/// The returned future is the envelope's unit of work; transports track it until it
/// completes.
pub type EnvelopeCallback = Arc<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Diagnostic label for start-up summaries.
    fn medium_name(&self) -> &'static str;

    /// Begin receiving envelopes addressed to `local`.
    async fn connect(&self, local: EndpointAddress, on_envelope: EnvelopeCallback) -> Result<(), TransportError>;

    /// Deliver one envelope to its `Recipient`.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Stop receiving and wait for in-flight envelopes to finish.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
