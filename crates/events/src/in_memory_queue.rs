//! In-memory queue transport.
//!
//! [`InMemoryQueue`] is a process-local broker: one unbounded queue per endpoint,
//! shared by every [`InMemoryQueueTransport`] created from it. Queues outlive
//! connections, so envelopes sent while an endpoint is disconnected wait for it.
//!
//! Each connected transport runs a receive loop that hands every envelope to the bus
//! callback as its own task, tracked by a `TaskTracker`. A slow or failing handler
//! never blocks reception. `disconnect` stops the loop and waits until the tracked
//! tasks have drained.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument};

use crate::address::EndpointAddress;
use crate::codec::MessageCodec;
use crate::envelope::Envelope;
use crate::transport::{EnvelopeCallback, Transport, TransportError};

const MEDIUM_NAME: &str = "in-memory queue";

enum Frame {
    Envelope(Envelope),
    Wire(String),
}

type Receiver = mpsc::UnboundedReceiver<Frame>;

struct Slot {
    sender: mpsc::UnboundedSender<Frame>,
    /// `None` while a transport is consuming the queue.
    receiver: Option<Receiver>,
}

/// Shared broker. Clones refer to the same set of queues.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    queues: Arc<RwLock<HashMap<EndpointAddress, Slot>>>,
    codec: Option<Arc<MessageCodec>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that serialises every envelope with `codec` on send and decodes it on
    /// receipt, as a wire transport would.
    pub fn wire(codec: MessageCodec) -> Self {
        Self {
            queues: Arc::default(),
            codec: Some(Arc::new(codec)),
        }
    }

    /// Create the queue for `endpoint` if it does not exist yet.
    pub async fn declare(&self, endpoint: &EndpointAddress) {
        let mut queues = self.queues.write().await;
        queues.entry(endpoint.clone()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            Slot {
                sender,
                receiver: Some(receiver),
            }
        });
    }

    pub async fn is_declared(&self, endpoint: &EndpointAddress) -> bool {
        self.queues.read().await.contains_key(endpoint)
    }

    pub fn transport(&self) -> InMemoryQueueTransport {
        InMemoryQueueTransport::new(self.clone())
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<(), TransportError> {
        let recipient = envelope
            .recipient()
            .map_err(|err| TransportError::MissingRecipient(err.to_string()))?;

        let frame = match &self.codec {
            Some(codec) => Frame::Wire(
                codec
                    .encode(&envelope)
                    .map_err(|err| TransportError::other(err.to_string()))?,
            ),
            None => Frame::Envelope(envelope),
        };

        let queues = self.queues.read().await;
        let slot = queues
            .get(&recipient)
            .ok_or_else(|| TransportError::UnknownEndpoint(recipient.clone()))?;
        slot.sender
            .send(frame)
            .map_err(|_| TransportError::UnknownEndpoint(recipient))
    }

    async fn take_receiver(&self, endpoint: &EndpointAddress) -> Result<Receiver, TransportError> {
        self.declare(endpoint).await;
        let mut queues = self.queues.write().await;
        queues
            .get_mut(endpoint)
            .and_then(|slot| slot.receiver.take())
            .ok_or_else(|| TransportError::AlreadyConnected(endpoint.clone()))
    }

    async fn return_receiver(&self, endpoint: &EndpointAddress, receiver: Receiver) {
        if let Some(slot) = self.queues.write().await.get_mut(endpoint) {
            slot.receiver = Some(receiver);
        }
    }

    fn open(&self, frame: Frame) -> Result<Envelope, TransportError> {
        match (frame, &self.codec) {
            (Frame::Envelope(envelope), _) => Ok(envelope),
            (Frame::Wire(text), Some(codec)) => codec
                .decode(&text)
                .map_err(|err| TransportError::other(err.to_string())),
            (Frame::Wire(_), None) => Err(TransportError::other("wire frame on a broker without codec")),
        }
    }
}

struct Connection {
    local: EndpointAddress,
    cancel: CancellationToken,
    receive_loop: JoinHandle<Receiver>,
}

/// One endpoint's connection to an [`InMemoryQueue`].
pub struct InMemoryQueueTransport {
    queue: InMemoryQueue,
    tracker: TaskTracker,
    connection: Mutex<Option<Connection>>,
}

impl InMemoryQueueTransport {
    pub fn new(queue: InMemoryQueue) -> Self {
        Self {
            queue,
            tracker: TaskTracker::new(),
            connection: Mutex::new(None),
        }
    }

    /// Envelopes currently being handled.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

#[async_trait]
impl Transport for InMemoryQueueTransport {
    fn medium_name(&self) -> &'static str {
        MEDIUM_NAME
    }

    #[instrument(skip_all, fields(endpoint = %local), err)]
    async fn connect(&self, local: EndpointAddress, on_envelope: EnvelopeCallback) -> Result<(), TransportError> {
        let mut connection = self.connection.lock().await;
        if let Some(existing) = connection.as_ref() {
            return Err(TransportError::AlreadyConnected(existing.local.clone()));
        }

        let mut receiver = self.queue.take_receiver(&local).await?;
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let tracker = self.tracker.clone();
        let queue = self.queue.clone();

        let receive_loop = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = stop.cancelled() => break,
                    frame = receiver.recv() => frame,
                };
                let Some(frame) = frame else { break };
                match queue.open(frame) {
                    Ok(envelope) => {
                        tracker.spawn(on_envelope(envelope));
                    }
                    Err(err) => error!(error = %err, "dropping undecodable frame"),
                }
            }
            receiver
        });

        info!("connected");
        *connection = Some(Connection {
            local,
            cancel,
            receive_loop,
        });
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.queue.enqueue(envelope).await
    }

    #[instrument(skip(self), err)]
    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };

        connection.cancel.cancel();
        let receiver = connection
            .receive_loop
            .await
            .map_err(|err| TransportError::other(format!("receive loop failed: {err}")))?;
        self.queue.return_receiver(&connection.local, receiver).await;

        debug!(in_flight = self.tracker.len(), "draining");
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();

        info!(endpoint = %connection.local, "disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusState, Jitney};
    use crate::error::BusError;
    use crate::config::JitneyConfiguration;
    use crate::subscription_store::InMemorySubscriptionStore;
    use serde::{Deserialize, Serialize};
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct ValueCommand {
        value: i32,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct ValueChanged {
        value: i32,
    }

    crate::command!(ValueCommand);
    crate::event!(ValueChanged);

    fn addr(q: &str) -> EndpointAddress {
        EndpointAddress::new(q, "host").unwrap()
    }

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn command_travels_to_the_mapped_endpoint() {
        let queue = InMemoryQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handling = JitneyConfiguration::new();
        handling
            .with_local_endpoint(addr("billing"))
            .add_command_handler(move |cmd: Arc<ValueCommand>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(cmd.value);
                    Ok(())
                }
            })
            .unwrap();
        let billing = Jitney::with_transport(handling, Arc::new(queue.transport())).unwrap();
        billing.start().await.unwrap();

        let mut sending = JitneyConfiguration::new();
        sending
            .with_local_endpoint(addr("orders"))
            .map_contract::<ValueCommand>(addr("billing"));
        let orders = Jitney::with_transport(sending, Arc::new(queue.transport())).unwrap();

        orders.send(ValueCommand { value: 42 }).await.unwrap();
        assert_eq!(recv(&mut rx).await, 42);

        billing.stop().await.unwrap();
    }

    #[tokio::test]
    async fn wire_mode_rebuilds_the_concrete_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = JitneyConfiguration::new();
        config
            .with_local_endpoint(addr("billing"))
            .add_command_handler(move |cmd: Arc<ValueCommand>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(cmd.value);
                    Ok(())
                }
            })
            .unwrap();

        let queue = InMemoryQueue::wire(config.subscriptions().codec().clone());
        let bus = Jitney::with_transport(config, Arc::new(queue.transport())).unwrap();
        bus.start().await.unwrap();

        bus.send(ValueCommand { value: 7 }).await.unwrap();
        assert_eq!(recv(&mut rx).await, 7);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn sending_to_an_undeclared_endpoint_fails() {
        let queue = InMemoryQueue::new();
        let transport = queue.transport();
        let envelope = Envelope::create(addr("a"), addr("nowhere"), Arc::new(ValueCommand { value: 1 }));

        assert!(matches!(
            transport.send(envelope).await,
            Err(TransportError::UnknownEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_reception() {
        let queue = InMemoryQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut config = JitneyConfiguration::new();
        config
            .with_local_endpoint(addr("billing"))
            .add_command_handler(move |cmd: Arc<ValueCommand>| {
                let tx = tx.clone();
                async move {
                    if cmd.value < 0 {
                        anyhow::bail!("negative value");
                    }
                    let _ = tx.send(cmd.value);
                    Ok(())
                }
            })
            .unwrap();
        let bus = Jitney::with_transport(config, Arc::new(queue.transport())).unwrap();
        bus.start().await.unwrap();

        bus.send(ValueCommand { value: -1 }).await.unwrap();
        bus.send(ValueCommand { value: 5 }).await.unwrap();
        assert_eq!(recv(&mut rx).await, 5);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_waits_for_in_flight_handlers() {
        let queue = InMemoryQueue::new();
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        let mut config = JitneyConfiguration::new();
        let done = finished.clone();
        config
            .with_local_endpoint(addr("slow"))
            .add_command_handler(move |_: Arc<ValueCommand>| {
                let (done, started_tx) = (done.clone(), started_tx.clone());
                async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    done.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        let bus = Jitney::with_transport(config, Arc::new(queue.transport())).unwrap();
        bus.start().await.unwrap();

        bus.send(ValueCommand { value: 1 }).await.unwrap();
        recv(&mut started_rx).await;
        bus.stop().await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handler_can_publish_while_stop_drains() {
        let queue = InMemoryQueue::new();
        let cell: Arc<OnceLock<Jitney>> = Arc::default();
        let published = Arc::new(AtomicBool::new(false));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        let mut config = JitneyConfiguration::new();
        let (bus_cell, done) = (cell.clone(), published.clone());
        config
            .with_local_endpoint(addr("worker"))
            .add_command_handler(move |_: Arc<ValueCommand>| {
                let (bus_cell, done, started_tx) = (bus_cell.clone(), done.clone(), started_tx.clone());
                async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if let Some(bus) = bus_cell.get() {
                        bus.publish(ValueChanged { value: 1 }).await?;
                        done.store(true, Ordering::SeqCst);
                    }
                    Ok(())
                }
            })
            .unwrap();
        let bus = Jitney::with_transport(config, Arc::new(queue.transport())).unwrap();
        let _ = cell.set(bus.clone());
        bus.start().await.unwrap();

        bus.send(ValueCommand { value: 1 }).await.unwrap();
        recv(&mut started_rx).await;
        tokio::time::timeout(Duration::from_secs(2), bus.stop())
            .await
            .expect("stop never returned")
            .unwrap();

        assert!(published.load(Ordering::SeqCst));
        assert_eq!(bus.state().await, BusState::Stopped);
        assert!(matches!(bus.send(ValueCommand { value: 2 }).await, Err(BusError::Stopped)));
    }

    #[tokio::test]
    async fn failed_start_can_be_retried() {
        let queue = InMemoryQueue::new();
        let mut config = JitneyConfiguration::new();
        config
            .with_local_endpoint(addr("reporting"))
            .map_contract::<ValueChanged>(addr("inventory"))
            .add_event_handler(|_: Arc<ValueChanged>| async { Ok(()) });
        let bus = Jitney::with_transport(config, Arc::new(queue.transport())).unwrap();

        assert!(matches!(
            bus.start().await,
            Err(BusError::Transport(TransportError::UnknownEndpoint(_)))
        ));
        assert_eq!(bus.state().await, BusState::Created);

        queue.declare(&addr("inventory")).await;
        bus.start().await.unwrap();
        assert_eq!(bus.state().await, BusState::Started);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn subscribers_announce_themselves_to_the_publisher() {
        let queue = InMemoryQueue::new();

        let publisher_store = Arc::new(InMemorySubscriptionStore::new());
        let mut publishing = JitneyConfiguration::new();
        publishing
            .with_local_endpoint(addr("inventory"))
            .with_subscription_store(publisher_store.clone());
        let inventory = Jitney::with_transport(publishing, Arc::new(queue.transport())).unwrap();
        inventory.start().await.unwrap();

        let seen = Arc::new(AtomicI32::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subscribing = JitneyConfiguration::new();
        let sink = seen.clone();
        subscribing
            .with_local_endpoint(addr("reporting"))
            .map_contract::<ValueChanged>(addr("inventory"))
            .add_event_handler(move |event: Arc<ValueChanged>| {
                let (sink, tx) = (sink.clone(), tx.clone());
                async move {
                    sink.store(event.value, Ordering::SeqCst);
                    let _ = tx.send(());
                    Ok(())
                }
            });
        let reporting = Jitney::with_transport(subscribing, Arc::new(queue.transport())).unwrap();
        reporting.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while publisher_store.is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription never arrived");

        inventory.publish(ValueChanged { value: 9 }).await.unwrap();
        recv(&mut rx).await;
        assert_eq!(seen.load(Ordering::SeqCst), 9);

        reporting.stop().await.unwrap();
        inventory.stop().await.unwrap();
    }
}
