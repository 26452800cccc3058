//! Incoming envelope and incoming message pipelines.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, instrument, warn};

use jitney_core::CorrelationId;

use crate::address::EndpointAddress;
use crate::correlation;
use crate::envelope::Envelope;
use crate::error::{BusError, BusResult};
use crate::message::{Message, MessageIntent, SubscriptionMessage, downcast_message};
use crate::registry::JitneySubscriptions;
use crate::subscription_store::SubscriptionStore;

use super::{Next, Pipeline, PipelineStep};

pub struct IncomingEnvelopeContext {
    pub envelope: Envelope,
}

impl IncomingEnvelopeContext {
    pub fn new(envelope: Envelope) -> Self {
        Self { envelope }
    }
}

/// A received message after classification.
pub struct IncomingMessageContext {
    pub message: Arc<dyn Message>,
    pub intent: MessageIntent,
    pub correlation_id: Option<CorrelationId>,
    pub sender: Option<EndpointAddress>,
}

impl IncomingMessageContext {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            message: envelope.body().clone(),
            intent: envelope.intent(),
            correlation_id: envelope.correlation_id().ok(),
            sender: envelope.sender().ok(),
        }
    }
}

/// Terminal step of the incoming envelope pipeline.
pub struct ClassifyEnvelopeStep {
    messages: Pipeline<IncomingMessageContext>,
}

impl ClassifyEnvelopeStep {
    pub fn new(messages: Pipeline<IncomingMessageContext>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl PipelineStep<IncomingEnvelopeContext> for ClassifyEnvelopeStep {
    fn name(&self) -> &str {
        "ClassifyEnvelope"
    }

    async fn invoke(&self, context: &mut IncomingEnvelopeContext, _next: Next<'_, IncomingEnvelopeContext>) -> BusResult<()> {
        let mut message = IncomingMessageContext::from_envelope(&context.envelope);
        if message.intent == MessageIntent::Unknown {
            warn!(
                message_type = message.message.message_type(),
                "dropping envelope with unknown intent"
            );
            return Ok(());
        }
        self.messages.execute(&mut message).await
    }
}

/// Terminal step of the incoming message pipeline.
///
/// Runs inside the message's correlation scope: commands go to their single
/// subscription, events fan out to every subscription, subscription announcements are
/// saved to the subscription store.
pub struct DispatchMessageStep {
    registry: Arc<JitneySubscriptions>,
    store: Arc<dyn SubscriptionStore>,
}

impl DispatchMessageStep {
    pub fn new(registry: Arc<JitneySubscriptions>, store: Arc<dyn SubscriptionStore>) -> Self {
        Self { registry, store }
    }

    async fn dispatch(&self, intent: MessageIntent, message: Arc<dyn Message>) -> BusResult<()> {
        match intent {
            MessageIntent::Command => {
                let subscription = self.registry.get_command_subscription(message.as_ref())?;
                subscription.handle(message).await.map_err(BusError::Handler)
            }
            MessageIntent::Event => {
                let subscriptions = self.registry.get_event_subscriptions(message.as_ref());
                if subscriptions.is_empty() {
                    debug!("no local handlers for event");
                    return Ok(());
                }
                try_join_all(subscriptions.iter().map(|s| s.handle(message.clone())))
                    .await
                    .map_err(BusError::Handler)?;
                Ok(())
            }
            MessageIntent::SubscriptionMessage => {
                let announcement = downcast_message::<SubscriptionMessage>(message)
                    .ok_or_else(|| BusError::invalid_argument("subscription intent on a non-subscription message"))?;
                debug!(
                    endpoint = %announcement.handling_endpoint(),
                    subscribed_type = announcement.subscribed_type(),
                    "subscription received"
                );
                self.store.save(&announcement).await
            }
            MessageIntent::Unknown => Ok(()),
        }
    }
}

#[async_trait]
impl PipelineStep<IncomingMessageContext> for DispatchMessageStep {
    fn name(&self) -> &str {
        "DispatchMessage"
    }

    #[instrument(
        skip_all,
        fields(
            message_type = context.message.message_type(),
            intent = %context.intent,
            correlation_id = ?context.correlation_id
        ),
        err
    )]
    async fn invoke(&self, context: &mut IncomingMessageContext, _next: Next<'_, IncomingMessageContext>) -> BusResult<()> {
        let work = self.dispatch(context.intent, context.message.clone());
        match context.correlation_id {
            Some(id) => correlation::scope(id, work).await,
            None => work.await,
        }
    }
}
