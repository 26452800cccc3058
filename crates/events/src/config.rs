//! Bus configuration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::address::EndpointAddress;
use crate::catalog::{HandlerCatalog, HandlerDescriptor, HandlerResolver};
use crate::error::{BusError, BusResult};
use crate::message::{Command, Event, Message, type_name_of};
use crate::pipeline::{
    IncomingEnvelopeContext, IncomingMessageContext, OutgoingEnvelopeContext, OutgoingMessageContext, Pipeline,
    PipelineStep,
};
use crate::registry::JitneySubscriptions;
use crate::subscription::HandlerResult;
use crate::subscription_store::{InMemorySubscriptionStore, SubscriptionStore};

/// Environment variable holding the local endpoint (`queue@machine` or `queue`).
pub const LOCAL_ENDPOINT_ENV: &str = "JITNEY_LOCAL_ENDPOINT";

/// Everything a [`Jitney`](crate::Jitney) bus is built from.
///
/// Methods chain on `&mut Self`; registrations that can fail return
/// `BusResult<&mut Self>` so chains continue with `?`.
pub struct JitneyConfiguration {
    pub(crate) local_endpoint: Option<EndpointAddress>,
    pub(crate) contracts: HashMap<String, EndpointAddress>,
    pub(crate) subscriptions: JitneySubscriptions,
    pub(crate) subscription_store: Arc<dyn SubscriptionStore>,
    pub(crate) outgoing_messages: Pipeline<OutgoingMessageContext>,
    pub(crate) outgoing_envelopes: Pipeline<OutgoingEnvelopeContext>,
    pub(crate) incoming_envelopes: Pipeline<IncomingEnvelopeContext>,
    pub(crate) incoming_messages: Pipeline<IncomingMessageContext>,
}

impl Default for JitneyConfiguration {
    fn default() -> Self {
        Self {
            local_endpoint: None,
            contracts: HashMap::new(),
            subscriptions: JitneySubscriptions::new(),
            subscription_store: Arc::new(InMemorySubscriptionStore::new()),
            outgoing_messages: Pipeline::new(),
            outgoing_envelopes: Pipeline::new(),
            incoming_envelopes: Pipeline::new(),
            incoming_messages: Pipeline::new(),
        }
    }
}

impl JitneyConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with the local endpoint taken from `JITNEY_LOCAL_ENDPOINT`.
    pub fn from_env() -> BusResult<Self> {
        let raw = std::env::var(LOCAL_ENDPOINT_ENV).map_err(|_| BusError::MissingLocalEndpoint)?;
        let endpoint: EndpointAddress = raw.parse()?;
        let mut config = Self::new();
        config.with_local_endpoint(endpoint);
        Ok(config)
    }

    pub fn with_local_endpoint(&mut self, endpoint: EndpointAddress) -> &mut Self {
        self.local_endpoint = Some(endpoint);
        self
    }

    pub fn local_endpoint(&self) -> BusResult<&EndpointAddress> {
        self.local_endpoint.as_ref().ok_or(BusError::MissingLocalEndpoint)
    }

    /// Route message type `M` to `endpoint`.
    ///
    /// For commands this is the handling endpoint; for events it is the publisher this
    /// endpoint announces its subscription to at start-up.
    pub fn map_contract<M: Message>(&mut self, endpoint: EndpointAddress) -> &mut Self {
        self.contracts.insert(type_name_of::<M>().to_string(), endpoint);
        self
    }

    pub fn add_command_handler<C, F, Fut>(&mut self, handler: F) -> BusResult<&mut Self>
    where
        C: Command + DeserializeOwned,
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscriptions.add_command_handler(handler)?;
        Ok(self)
    }

    pub fn add_event_handler<E, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        E: Event + DeserializeOwned,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscriptions.add_event_handler(handler);
        self
    }

    pub fn scan_for_message_handlers<F>(&mut self, catalog: &HandlerCatalog, register: F) -> BusResult<&mut Self>
    where
        F: FnMut(&HandlerDescriptor),
    {
        self.subscriptions.scan_for_message_handlers(catalog, register)?;
        Ok(self)
    }

    pub fn with_handler_resolver(&mut self, resolver: Arc<dyn HandlerResolver>) -> &mut Self {
        self.subscriptions.set_resolver(resolver);
        self
    }

    pub fn with_subscription_store(&mut self, store: Arc<dyn SubscriptionStore>) -> &mut Self {
        self.subscription_store = store;
        self
    }

    /// Make `M` decodable from the wire without registering a handler for it.
    pub fn register_message<M: Message + DeserializeOwned>(&mut self) -> &mut Self {
        self.subscriptions.codec_mut().register::<M>();
        self
    }

    pub fn add_outgoing_message_step(&mut self, step: Arc<dyn PipelineStep<OutgoingMessageContext>>) -> &mut Self {
        self.outgoing_messages.add(step);
        self
    }

    pub fn add_outgoing_envelope_step(&mut self, step: Arc<dyn PipelineStep<OutgoingEnvelopeContext>>) -> &mut Self {
        self.outgoing_envelopes.add(step);
        self
    }

    pub fn add_incoming_envelope_step(&mut self, step: Arc<dyn PipelineStep<IncomingEnvelopeContext>>) -> &mut Self {
        self.incoming_envelopes.add(step);
        self
    }

    pub fn add_incoming_message_step(&mut self, step: Arc<dyn PipelineStep<IncomingMessageContext>>) -> &mut Self {
        self.incoming_messages.add(step);
        self
    }

    pub fn subscriptions(&self) -> &JitneySubscriptions {
        &self.subscriptions
    }

    /// Configuration items for the start-up summary.
    pub fn describe(&self) -> Vec<String> {
        let mut items = Vec::new();
        match &self.local_endpoint {
            Some(endpoint) => items.push(format!("local endpoint: {endpoint}")),
            None => items.push("local endpoint: <unset>".to_string()),
        }

        let mut contracts: Vec<_> = self
            .contracts
            .iter()
            .map(|(message_type, endpoint)| format!("contract: {message_type} -> {endpoint}"))
            .collect();
        contracts.sort();
        items.extend(contracts);

        items.push(format!(
            "subscribed event types: {}",
            self.subscriptions.get_subscribed_event_types().len()
        ));
        items.push(format!(
            "cached handler invocations: {}",
            self.subscriptions.invocation_cache().len()
        ));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Bill;

    crate::command!(Bill);

    fn addr(q: &str) -> EndpointAddress {
        EndpointAddress::new(q, "host").unwrap()
    }

    #[test]
    fn missing_local_endpoint_is_a_configuration_error() {
        let config = JitneyConfiguration::new();
        assert!(matches!(config.local_endpoint(), Err(BusError::MissingLocalEndpoint)));
    }

    #[test]
    fn chained_configuration_accumulates() {
        let mut config = JitneyConfiguration::new();
        config
            .with_local_endpoint(addr("orders"))
            .map_contract::<Bill>(addr("billing"))
            .add_command_handler(|_: Arc<Bill>| async { Ok(()) })
            .unwrap();

        let items = config.describe();
        assert!(items.contains(&"local endpoint: orders@host".to_string()));
        assert!(items.iter().any(|item| item.ends_with("-> billing@host")));
        assert!(config.add_command_handler(|_: Arc<Bill>| async { Ok(()) }).is_err());
    }
}
