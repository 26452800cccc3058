//! The Jitney bus.
//!
//! A bus is built once from a [`JitneyConfiguration`] and then shared by cloning the
//! handle. Building composes the four pipelines, appending the built-in terminal step
//! to each:
//!
//! ```text
//! send/publish
//!   -> outgoing message steps -> CreateEnvelopes
//!   -> outgoing envelope steps -> TransportSend | InlineDelivery
//!                                      |
//!   transport callback / inline  <-----+
//!   -> incoming envelope steps -> ClassifyEnvelope
//!   -> incoming message steps -> DispatchMessage -> handlers
//! ```
//!
//! ## Variants
//!
//! - [`Jitney::direct`]: no transport. Envelopes are handed to the incoming pipeline on
//!   the sender's task, so `send(..).await` returns after the handler ran and handler
//!   failures reach the caller.
//! - [`Jitney::with_transport`]: envelopes go to a [`Transport`]. Received envelopes are
//!   processed by the incoming pipeline; failures there are logged and swallowed so one
//!   bad message never stops reception. Failures of the outgoing pipeline are always
//!   returned to the caller.
//!
//! ## Lifecycle
//!
//! `Created -> Started -> Stopping -> Stopped`. Sending works before `start`, but
//! subscription announcements (and therefore event routing to this endpoint) happen in
//! `start`. While `stop` drains the transport the bus is `Stopping`: in-flight handlers
//! may still send and publish, new callers are rejected only once it is `Stopped`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::address::EndpointAddress;
use crate::codec::MessageCodec;
use crate::config::JitneyConfiguration;
use crate::error::{BusError, BusResult};
use crate::message::{Command, Event, Message, SubscriptionMessage};
use crate::pipeline::{
    ClassifyEnvelopeStep, CreateEnvelopesStep, DispatchMessageStep, IncomingEnvelopeContext, OutgoingMessageContext,
    Pipeline, TransportSendStep,
};
use crate::registry::JitneySubscriptions;
use crate::subscription_store::SubscriptionStore;
use crate::summary::StartupSummary;
use crate::transport::{EnvelopeCallback, Transport};

const DIRECT_MEDIUM: &str = "direct (in-process)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Created,
    Started,
    Stopping,
    Stopped,
}

#[derive(Clone)]
pub struct Jitney {
    inner: Arc<Inner>,
}

struct Inner {
    local: EndpointAddress,
    registry: Arc<JitneySubscriptions>,
    store: Arc<dyn SubscriptionStore>,
    contracts: Arc<HashMap<String, EndpointAddress>>,
    outgoing: Pipeline<OutgoingMessageContext>,
    incoming: Pipeline<IncomingEnvelopeContext>,
    transport: Option<Arc<dyn Transport>>,
    pipeline_names: Vec<(&'static str, Vec<String>)>,
    config_items: Vec<String>,
    state: Mutex<BusState>,
}

impl Jitney {
    /// In-process bus without a transport.
    pub fn direct(config: JitneyConfiguration) -> BusResult<Self> {
        Self::build(config, None)
    }

    /// Bus whose envelopes travel through `transport`.
    pub fn with_transport(config: JitneyConfiguration, transport: Arc<dyn Transport>) -> BusResult<Self> {
        Self::build(config, Some(transport))
    }

    fn build(config: JitneyConfiguration, transport: Option<Arc<dyn Transport>>) -> BusResult<Self> {
        let local = config.local_endpoint()?.clone();
        let config_items = config.describe();

        let JitneyConfiguration {
            contracts,
            subscriptions,
            subscription_store: store,
            outgoing_messages,
            outgoing_envelopes,
            incoming_envelopes,
            incoming_messages,
            ..
        } = config;

        let registry = Arc::new(subscriptions);
        let contracts = Arc::new(contracts);

        let incoming_messages =
            incoming_messages.terminated_by(Arc::new(DispatchMessageStep::new(registry.clone(), store.clone())));
        let incoming =
            incoming_envelopes.terminated_by(Arc::new(ClassifyEnvelopeStep::new(incoming_messages.clone())));

        let send_step = match &transport {
            Some(transport) => TransportSendStep::new(transport.clone()),
            None => TransportSendStep::inline(incoming.clone()),
        };
        let outgoing_envelopes = outgoing_envelopes.terminated_by(Arc::new(send_step));
        let outgoing = outgoing_messages.terminated_by(Arc::new(CreateEnvelopesStep::new(
            contracts.clone(),
            registry.clone(),
            store.clone(),
            outgoing_envelopes.clone(),
        )));

        let pipeline_names = vec![
            ("outgoing message", outgoing.step_names()),
            ("outgoing envelope", outgoing_envelopes.step_names()),
            ("incoming envelope", incoming.step_names()),
            ("incoming message", incoming_messages.step_names()),
        ];

        Ok(Self {
            inner: Arc::new(Inner {
                local,
                registry,
                store,
                contracts,
                outgoing,
                incoming,
                transport,
                pipeline_names,
                config_items,
                state: Mutex::new(BusState::Created),
            }),
        })
    }

    pub fn local_endpoint(&self) -> &EndpointAddress {
        &self.inner.local
    }

    pub fn subscriptions(&self) -> &JitneySubscriptions {
        &self.inner.registry
    }

    /// Codec knowing every message type a handler was registered for.
    pub fn codec(&self) -> &MessageCodec {
        self.inner.registry.codec()
    }

    pub async fn state(&self) -> BusState {
        *self.inner.state.lock().await
    }

    pub fn summary(&self) -> StartupSummary {
        StartupSummary {
            endpoint: self.inner.local.clone(),
            transport_medium: self
                .inner
                .transport
                .as_ref()
                .map_or(DIRECT_MEDIUM, |t| t.medium_name()),
            pipelines: self.inner.pipeline_names.clone(),
            items: self.inner.config_items.clone(),
        }
    }

    /// Connect the transport (if any) and announce every subscribed event type.
    ///
    /// Each subscription is saved to the local subscription store, and sent as a
    /// [`SubscriptionMessage`] to the publisher mapped for that type when it lives
    /// elsewhere. A direct bus has no way to reach another endpoint, so it only records
    /// local subscriptions. If announcing fails the transport is disconnected again and
    /// the bus stays `Created`, so `start` can be retried.
    #[instrument(skip(self), fields(endpoint = %self.inner.local), err)]
    pub async fn start(&self) -> BusResult<()> {
        let mut state = self.inner.state.lock().await;
        match *state {
            BusState::Started => return Err(BusError::AlreadyStarted),
            BusState::Stopping | BusState::Stopped => return Err(BusError::Stopped),
            BusState::Created => {}
        }

        if let Some(transport) = &self.inner.transport {
            transport.connect(self.inner.local.clone(), self.receive_callback()).await?;
        }

        let announced = match self.announce_subscriptions().await {
            Ok(announced) => announced,
            Err(err) => {
                if let Some(transport) = &self.inner.transport {
                    if let Err(disconnect) = transport.disconnect().await {
                        warn!(error = %disconnect, "disconnect after failed start");
                    }
                }
                return Err(err);
            }
        };

        *state = BusState::Started;
        info!(
            remote_announcements = announced,
            summary = %self.summary(),
            "jitney started"
        );
        Ok(())
    }

    async fn announce_subscriptions(&self) -> BusResult<usize> {
        let mut announced = 0usize;
        for message_type in self.inner.registry.get_subscribed_event_types() {
            let announcement = SubscriptionMessage::new(self.inner.local.clone(), message_type);
            self.inner.store.save(&announcement).await?;

            let Some(publisher) = self.inner.contracts.get(message_type) else {
                continue;
            };
            if *publisher == self.inner.local {
                continue;
            }
            if self.inner.transport.is_none() {
                debug!(message_type, publisher = %publisher, "direct bus, remote announcement skipped");
                continue;
            }
            let context =
                OutgoingMessageContext::new(Arc::new(announcement), self.inner.local.clone()).to(publisher.clone());
            self.run_outgoing(context).await?;
            announced += 1;
        }
        Ok(announced)
    }

    /// Disconnect the transport, waiting for in-flight envelopes. Idempotent.
    ///
    /// The state lock is released while draining, so handlers still running can send.
    #[instrument(skip(self), fields(endpoint = %self.inner.local), err)]
    pub async fn stop(&self) -> BusResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            if matches!(*state, BusState::Stopping | BusState::Stopped) {
                return Ok(());
            }
            *state = BusState::Stopping;
        }

        let drained = match &self.inner.transport {
            Some(transport) => transport.disconnect().await,
            None => Ok(()),
        };

        *self.inner.state.lock().await = BusState::Stopped;
        drained?;
        info!("jitney stopped");
        Ok(())
    }

    pub async fn send<C: Command>(&self, command: C) -> BusResult<()> {
        self.send_message(Arc::new(command)).await
    }

    pub async fn publish<E: Event>(&self, event: E) -> BusResult<()> {
        self.publish_message(Arc::new(event)).await
    }

    /// Send an already shared command.
    pub async fn send_message(&self, command: Arc<dyn Message>) -> BusResult<()> {
        self.ensure_running().await?;
        self.run_outgoing(OutgoingMessageContext::new(command, self.inner.local.clone()))
            .await
    }

    /// Publish an already shared event to every subscribed endpoint.
    pub async fn publish_message(&self, event: Arc<dyn Message>) -> BusResult<()> {
        self.ensure_running().await?;
        self.run_outgoing(OutgoingMessageContext::new(event, self.inner.local.clone()))
            .await
    }

    /// Run a prepared outgoing context, e.g. one with extra headers or an explicit destination.
    pub async fn dispatch(&self, mut context: OutgoingMessageContext) -> BusResult<()> {
        self.ensure_running().await?;
        self.inner.outgoing.execute(&mut context).await
    }

    async fn run_outgoing(&self, mut context: OutgoingMessageContext) -> BusResult<()> {
        debug!(
            message_type = context.message.message_type(),
            intent = %context.message.intent(),
            "outgoing"
        );
        self.inner.outgoing.execute(&mut context).await
    }

    async fn ensure_running(&self) -> BusResult<()> {
        match *self.inner.state.lock().await {
            BusState::Stopped => Err(BusError::Stopped),
            _ => Ok(()),
        }
    }

    fn receive_callback(&self) -> EnvelopeCallback {
        let incoming = self.inner.incoming.clone();
        Arc::new(move |envelope| {
            let incoming = incoming.clone();
            Box::pin(async move {
                let message_type = envelope.body().message_type();
                let mut context = IncomingEnvelopeContext::new(envelope);
                if let Err(err) = incoming.execute(&mut context).await {
                    error!(message_type = message_type, error = %err, "failed to handle incoming envelope");
                }
            })
        })
    }
}
