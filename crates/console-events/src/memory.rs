//! In-memory broker
//!
//! A single-process stand-in for RabbitMQ with the semantics the subsystem
//! relies on: topic, direct and fanout routing, the default exchange,
//! declaration equivalence checks, per-channel prefetch, and requeueing of
//! unacknowledged deliveries when a channel closes. Tests use its control
//! and inspection methods to simulate outages and observe traffic.
//!
//! Closed channels are forgotten, and the traffic logs keep only the most
//! recent [`TRAFFIC_LOG_CAPACITY`] entries, so a long-lived process holds a
//! bounded amount of bookkeeping.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use crate::broker::{
    topic_matches, Broker, BrokerChannel, BrokerError, BrokerResult, Delivery, DeliveryStream,
    ExchangeKind, ExchangeSpec, MessageProperties, QueueSpec, DEFAULT_EXCHANGE,
};

/// Entries kept in each of the published and settlement logs.
pub const TRAFFIC_LOG_CAPACITY: usize = 1024;

/// A message accepted by an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Target exchange
    pub exchange: String,
    /// Routing key
    pub routing_key: String,
    /// Message properties
    pub properties: MessageProperties,
    /// Raw body
    pub body: Vec<u8>,
}

/// How a consumer settled a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Acknowledged
    Ack {
        /// Delivery tag
        delivery_tag: u64,
    },
    /// Negatively acknowledged
    Nack {
        /// Delivery tag
        delivery_tag: u64,
        /// Whether the message went back to its queue
        requeue: bool,
    },
}

#[derive(Debug, Clone)]
struct Message {
    published: PublishedMessage,
    redelivered: bool,
}

#[derive(Debug)]
struct ExchangeEntry {
    spec: ExchangeSpec,
    /// (queue, binding key)
    bindings: Vec<(String, String)>,
}

#[derive(Debug)]
struct QueueEntry {
    spec: QueueSpec,
    ready: VecDeque<Message>,
}

/// An open channel. Closing removes the entry.
#[derive(Debug, Default)]
struct ChannelEntry {
    prefetch: u16,
    next_tag: u64,
    /// delivery tag -> (queue, message)
    unacked: BTreeMap<u64, (String, Message)>,
}

impl ChannelEntry {
    fn saturated(&self) -> bool {
        self.prefetch > 0 && self.unacked.len() >= usize::from(self.prefetch)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeEntry>,
    queues: HashMap<String, QueueEntry>,
    channels: HashMap<u64, ChannelEntry>,
    next_channel_id: u64,
    refuse_connections: bool,
    connections_opened: u64,
    published: VecDeque<PublishedMessage>,
    settlements: VecDeque<Settlement>,
}

fn push_bounded<T>(log: &mut VecDeque<T>, entry: T) {
    if log.len() == TRAFFIC_LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
}

impl BrokerState {
    fn ensure_open(&self, channel_id: u64) -> BrokerResult<()> {
        if self.channels.contains_key(&channel_id) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }

    fn open_channel_mut(&mut self, channel_id: u64) -> BrokerResult<&mut ChannelEntry> {
        self.channels
            .get_mut(&channel_id)
            .ok_or(BrokerError::ConnectionClosed)
    }

    /// Route a message to every matching queue and return how many got it.
    fn route(&mut self, message: PublishedMessage) -> BrokerResult<usize> {
        let targets: Vec<String> = if message.exchange == DEFAULT_EXCHANGE {
            if self.queues.contains_key(&message.routing_key) {
                vec![message.routing_key.clone()]
            } else {
                Vec::new()
            }
        } else {
            let exchange = self.exchanges.get(&message.exchange).ok_or_else(|| {
                BrokerError::NotFound(format!("no exchange '{}'", message.exchange))
            })?;

            let mut targets = Vec::new();
            for (queue, key) in &exchange.bindings {
                let matched = match exchange.spec.kind {
                    ExchangeKind::Topic => topic_matches(key, &message.routing_key),
                    ExchangeKind::Direct => *key == message.routing_key,
                    ExchangeKind::Fanout => true,
                };
                if matched && !targets.contains(queue) {
                    targets.push(queue.clone());
                }
            }
            targets
        };

        for queue in &targets {
            if let Some(entry) = self.queues.get_mut(queue) {
                entry.ready.push_back(Message {
                    published: message.clone(),
                    redelivered: false,
                });
            }
        }

        push_bounded(&mut self.published, message);
        Ok(targets.len())
    }

    /// Close a channel and hand its unacknowledged deliveries back to their
    /// queues in the original order.
    fn close_channel(&mut self, channel_id: u64) {
        let Some(channel) = self.channels.remove(&channel_id) else {
            return;
        };

        for (_, (queue, mut message)) in channel.unacked.into_iter().rev() {
            if let Some(entry) = self.queues.get_mut(&queue) {
                message.redelivered = true;
                entry.ready.push_front(message);
            }
        }
    }

    fn requeue(&mut self, queue: &str, mut message: Message) {
        if let Some(entry) = self.queues.get_mut(queue) {
            message.redelivered = true;
            entry.ready.push_front(message);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    /// Woken whenever messages, channels or prefetch windows change
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory broker implementation.
///
/// Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) new connections.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.shared.lock().refuse_connections = refuse;
    }

    /// Drop every open connection, as a broker restart would.
    pub fn disconnect_all(&self) {
        {
            let mut state = self.shared.lock();
            let ids: Vec<u64> = state.channels.keys().copied().collect();
            for id in ids {
                state.close_channel(id);
            }
        }
        self.shared.notify.notify_waiters();
        debug!("Disconnected all in-memory broker connections");
    }

    /// Publish a message as an external client would.
    pub fn inject(&self, exchange: &str, routing_key: &str, body: &[u8]) -> BrokerResult<usize> {
        let routed = self.shared.lock().route(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: MessageProperties::persistent_json(),
            body: body.to_vec(),
        })?;
        self.shared.notify.notify_waiters();
        Ok(routed)
    }

    /// Remove and return the next ready message of a queue.
    pub fn take_message(&self, queue: &str) -> Option<PublishedMessage> {
        self.shared
            .lock()
            .queues
            .get_mut(queue)
            .and_then(|q| q.ready.pop_front())
            .map(|m| m.published)
    }

    /// Wait until a queue has a ready message, then remove and return it.
    pub async fn next_message(&self, queue: &str) -> PublishedMessage {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.take_message(queue) {
                return message;
            }
            notified.await;
        }
    }

    /// Ready messages in a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Deliveries handed out but not yet settled, across all channels.
    pub fn unacked_count(&self) -> usize {
        self.shared
            .lock()
            .channels
            .values()
            .map(|c| c.unacked.len())
            .sum()
    }

    /// Whether an exchange has been declared.
    pub fn has_exchange(&self, name: &str) -> bool {
        self.shared.lock().exchanges.contains_key(name)
    }

    /// Declared exchange with its kind, if any.
    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.shared.lock().exchanges.get(name).map(|e| e.spec.clone())
    }

    /// Whether a queue has been declared.
    pub fn has_queue(&self, name: &str) -> bool {
        self.shared.lock().queues.contains_key(name)
    }

    /// Number of declared exchanges.
    pub fn exchange_count(&self) -> usize {
        self.shared.lock().exchanges.len()
    }

    /// Number of declared queues.
    pub fn queue_count(&self) -> usize {
        self.shared.lock().queues.len()
    }

    /// Bindings of a queue as (exchange, binding key) pairs.
    pub fn bindings(&self, queue: &str) -> Vec<(String, String)> {
        let state = self.shared.lock();
        let mut bindings: Vec<(String, String)> = state
            .exchanges
            .iter()
            .flat_map(|(name, exchange)| {
                exchange
                    .bindings
                    .iter()
                    .filter(|(q, _)| q == queue)
                    .map(move |(_, key)| (name.clone(), key.clone()))
            })
            .collect();
        bindings.sort();
        bindings
    }

    /// Messages accepted by an exchange, in publish order. Only the most
    /// recent [`TRAFFIC_LOG_CAPACITY`] are kept.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.lock().published.iter().cloned().collect()
    }

    /// Acks and nacks, in order. Only the most recent
    /// [`TRAFFIC_LOG_CAPACITY`] are kept.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.shared.lock().settlements.iter().copied().collect()
    }

    /// Connections opened since creation.
    pub fn connections_opened(&self) -> u64 {
        self.shared.lock().connections_opened
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.shared.lock().channels.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> BrokerResult<Box<dyn BrokerChannel>> {
        let id = {
            let mut state = self.shared.lock();
            if state.refuse_connections {
                return Err(BrokerError::Connection("connection refused".to_string()));
            }
            state.next_channel_id += 1;
            let id = state.next_channel_id;
            state.channels.insert(id, ChannelEntry::default());
            state.connections_opened += 1;
            id
        };

        debug!(channel = id, "Opened in-memory broker connection");
        Ok(Box::new(MemoryChannel {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryChannel {
    id: u64,
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> BrokerResult<()> {
        let mut state = self.shared.lock();
        state.ensure_open(self.id)?;

        if spec.name == DEFAULT_EXCHANGE {
            return Err(BrokerError::Channel(
                "the default exchange cannot be declared".to_string(),
            ));
        }

        match state.exchanges.get(&spec.name).map(|e| e.spec != *spec) {
            Some(true) => {
                state.close_channel(self.id);
                Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for exchange '{}'",
                    spec.name
                )))
            }
            Some(false) => Ok(()),
            None => {
                state.exchanges.insert(
                    spec.name.clone(),
                    ExchangeEntry {
                        spec: spec.clone(),
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> BrokerResult<()> {
        let mut state = self.shared.lock();
        state.ensure_open(self.id)?;

        match state.queues.get(&spec.name).map(|q| q.spec != *spec) {
            Some(true) => {
                state.close_channel(self.id);
                Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{}'",
                    spec.name
                )))
            }
            Some(false) => Ok(()),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    QueueEntry {
                        spec: spec.clone(),
                        ready: VecDeque::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()> {
        let mut state = self.shared.lock();
        state.ensure_open(self.id)?;

        if !state.queues.contains_key(queue) {
            return Err(BrokerError::NotFound(format!("no queue '{}'", queue)));
        }
        let entry = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("no exchange '{}'", exchange)))?;

        let binding = (queue.to_string(), routing_key.to_string());
        if !entry.bindings.contains(&binding) {
            entry.bindings.push(binding);
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> BrokerResult<()> {
        self.shared.lock().open_channel_mut(self.id)?.prefetch = count;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> BrokerResult<()> {
        {
            let mut state = self.shared.lock();
            state.ensure_open(self.id)?;

            let routed = state.route(PublishedMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                properties: properties.clone(),
                body: body.to_vec(),
            });
            if let Err(e) = routed {
                state.close_channel(self.id);
                return Err(e);
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<Box<dyn DeliveryStream>> {
        {
            let state = self.shared.lock();
            state.ensure_open(self.id)?;
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::NotFound(format!("no queue '{}'", queue)));
            }
        }

        debug!(channel = self.id, queue, consumer_tag, "Started in-memory consumer");
        Ok(Box::new(MemoryConsumer {
            channel_id: self.id,
            queue: queue.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()> {
        {
            let mut state = self.shared.lock();
            state
                .open_channel_mut(self.id)?
                .unacked
                .remove(&delivery_tag)
                .ok_or_else(|| {
                    BrokerError::Channel(format!("unknown delivery tag {}", delivery_tag))
                })?;
            push_bounded(&mut state.settlements, Settlement::Ack { delivery_tag });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        {
            let mut state = self.shared.lock();
            let (queue, message) = state
                .open_channel_mut(self.id)?
                .unacked
                .remove(&delivery_tag)
                .ok_or_else(|| {
                    BrokerError::Channel(format!("unknown delivery tag {}", delivery_tag))
                })?;
            if requeue {
                state.requeue(&queue, message);
            }
            push_bounded(
                &mut state.settlements,
                Settlement::Nack {
                    delivery_tag,
                    requeue,
                },
            );
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.shared.lock().close_channel(self.id);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.lock().ensure_open(self.id).is_ok()
    }
}

// A dropped channel behaves like a dropped connection.
impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let closed = {
            let mut state = self.shared.lock();
            let open = state.channels.contains_key(&self.id);
            state.close_channel(self.id);
            open
        };
        if closed {
            self.shared.notify.notify_waiters();
        }
    }
}

struct MemoryConsumer {
    channel_id: u64,
    queue: String,
    shared: Arc<Shared>,
}

impl MemoryConsumer {
    /// Hand out the next ready message if the prefetch window allows it.
    fn try_deliver(&self) -> Option<BrokerResult<Delivery>> {
        let mut guard = self.shared.lock();
        let state = &mut *guard;

        let Some(channel) = state.channels.get_mut(&self.channel_id) else {
            return Some(Err(BrokerError::ConnectionClosed));
        };
        let Some(queue) = state.queues.get_mut(&self.queue) else {
            return Some(Err(BrokerError::NotFound(format!("no queue '{}'", self.queue))));
        };
        if channel.saturated() {
            return None;
        }

        let message = queue.ready.pop_front()?;
        channel.next_tag += 1;
        let delivery_tag = channel.next_tag;
        channel
            .unacked
            .insert(delivery_tag, (self.queue.clone(), message.clone()));

        Some(Ok(Delivery {
            delivery_tag,
            exchange: message.published.exchange,
            routing_key: message.published.routing_key,
            redelivered: message.redelivered,
            properties: message.published.properties,
            body: message.published.body,
        }))
    }
}

#[async_trait]
impl DeliveryStream for MemoryConsumer {
    async fn next_delivery(&mut self) -> Option<BrokerResult<Delivery>> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_deliver() {
                return Some(delivery);
            }
            notified.await;
        }
    }
}
