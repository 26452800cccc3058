//! Outgoing message and outgoing envelope pipelines.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use jitney_core::CorrelationId;

use crate::address::EndpointAddress;
use crate::correlation;
use crate::envelope::{Envelope, HeaderValue};
use crate::error::{BusError, BusResult};
use crate::message::{Message, MessageIntent, message_type_id};
use crate::registry::JitneySubscriptions;
use crate::subscription_store::SubscriptionStore;
use crate::transport::Transport;

use super::{IncomingEnvelopeContext, Next, Pipeline, PipelineStep};

/// A message on its way out, before envelopes exist.
pub struct OutgoingMessageContext {
    pub message: Arc<dyn Message>,
    pub local_endpoint: EndpointAddress,
    /// Explicit destination; skips routing when set.
    pub destination: Option<EndpointAddress>,
    /// Correlation to stamp; defaults to the flow's current correlation id.
    pub correlation_id: Option<CorrelationId>,
    /// Extra headers copied onto every envelope created for this message.
    pub headers: HashMap<String, HeaderValue>,
    /// Envelopes created by the terminal step, in send order.
    pub envelopes: Vec<Envelope>,
}

impl OutgoingMessageContext {
    pub fn new(message: Arc<dyn Message>, local_endpoint: EndpointAddress) -> Self {
        Self {
            message,
            local_endpoint,
            destination: None,
            correlation_id: None,
            headers: HashMap::new(),
            envelopes: Vec::new(),
        }
    }

    pub fn to(mut self, destination: EndpointAddress) -> Self {
        self.destination = Some(destination);
        self
    }
}

pub struct OutgoingEnvelopeContext {
    pub envelope: Envelope,
}

impl OutgoingEnvelopeContext {
    pub fn new(envelope: Envelope) -> Self {
        Self { envelope }
    }
}

/// Terminal step of the outgoing message pipeline.
///
/// Resolves destinations, builds one envelope per destination and runs each through the
/// outgoing envelope pipeline.
pub struct CreateEnvelopesStep {
    contracts: Arc<HashMap<String, EndpointAddress>>,
    registry: Arc<JitneySubscriptions>,
    store: Arc<dyn SubscriptionStore>,
    envelopes: Pipeline<OutgoingEnvelopeContext>,
}

impl CreateEnvelopesStep {
    pub fn new(
        contracts: Arc<HashMap<String, EndpointAddress>>,
        registry: Arc<JitneySubscriptions>,
        store: Arc<dyn SubscriptionStore>,
        envelopes: Pipeline<OutgoingEnvelopeContext>,
    ) -> Self {
        Self {
            contracts,
            registry,
            store,
            envelopes,
        }
    }

    async fn destinations(&self, context: &OutgoingMessageContext) -> BusResult<Vec<EndpointAddress>> {
        if let Some(destination) = &context.destination {
            return Ok(vec![destination.clone()]);
        }

        let message = context.message.as_ref();
        match message.intent() {
            MessageIntent::Command => {
                if let Some(endpoint) = self.contracts.get(message.message_type()) {
                    Ok(vec![endpoint.clone()])
                } else if self.registry.handles(message_type_id(message)) {
                    Ok(vec![context.local_endpoint.clone()])
                } else {
                    Err(BusError::MissingContract(message.message_type().to_string()))
                }
            }
            MessageIntent::Event => self.store.subscribed_endpoints(message.message_type()).await,
            MessageIntent::SubscriptionMessage | MessageIntent::Unknown => Err(BusError::invalid_argument(format!(
                "'{}' needs an explicit destination",
                message.message_type()
            ))),
        }
    }
}

#[async_trait]
impl PipelineStep<OutgoingMessageContext> for CreateEnvelopesStep {
    fn name(&self) -> &str {
        "CreateEnvelopes"
    }

    #[instrument(skip_all, fields(message_type = context.message.message_type()), err)]
    async fn invoke(&self, context: &mut OutgoingMessageContext, _next: Next<'_, OutgoingMessageContext>) -> BusResult<()> {
        let destinations = self.destinations(context).await?;
        if destinations.is_empty() {
            debug!("no subscribers, nothing sent");
            return Ok(());
        }

        let correlation_id = context.correlation_id.or_else(correlation::current);
        for destination in destinations {
            let mut envelope = Envelope::create_correlated(
                context.local_endpoint.clone(),
                destination,
                context.message.clone(),
                correlation_id,
            );
            for (key, value) in &context.headers {
                envelope.set_header(key.clone(), value.clone())?;
            }

            context.envelopes.push(envelope.clone());
            self.envelopes
                .execute(&mut OutgoingEnvelopeContext::new(envelope))
                .await?;
        }
        Ok(())
    }
}

enum Delivery {
    Transport(Arc<dyn Transport>),
    Inline(Pipeline<IncomingEnvelopeContext>),
}

/// Terminal step of the outgoing envelope pipeline: hands the envelope to the transport.
pub struct TransportSendStep {
    delivery: Delivery,
}

impl TransportSendStep {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            delivery: Delivery::Transport(transport),
        }
    }

    /// Deliver in-process by running the incoming envelope pipeline directly.
    pub fn inline(incoming: Pipeline<IncomingEnvelopeContext>) -> Self {
        Self {
            delivery: Delivery::Inline(incoming),
        }
    }
}

#[async_trait]
impl PipelineStep<OutgoingEnvelopeContext> for TransportSendStep {
    fn name(&self) -> &str {
        match self.delivery {
            Delivery::Transport(_) => "TransportSend",
            Delivery::Inline(_) => "InlineDelivery",
        }
    }

    async fn invoke(&self, context: &mut OutgoingEnvelopeContext, _next: Next<'_, OutgoingEnvelopeContext>) -> BusResult<()> {
        match &self.delivery {
            Delivery::Transport(transport) => Ok(transport.send(context.envelope.clone()).await?),
            Delivery::Inline(incoming) => {
                incoming
                    .execute(&mut IncomingEnvelopeContext::new(context.envelope.clone()))
                    .await
            }
        }
    }
}
