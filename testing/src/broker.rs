//! In-memory broker with AMQP 0-9-1 queue semantics.
//!
//! Models what the bus relies on from a real broker:
//!
//! - direct exchanges routing by exact key match to every bound queue
//! - idempotent declarations; redeclaring with other attributes fails
//! - queues shared by any number of sessions (competing consumers)
//! - per-session prefetch, delivery tags and unacknowledged messages
//! - `nack(requeue)` and session close put messages back at the head of the
//!   queue with `redelivered = true`
//! - consumer streams that yield to the scheduler after every delivery, as a
//!   network-backed consumer would
//!
//! # Example
//!
//! ```
//! use shipping_bus_testing::InMemoryBroker;
//! use std::sync::Arc;
//!
//! let broker = InMemoryBroker::new();
//! let session = Arc::new(broker.session());
//! assert_eq!(broker.queue_depth("tracking.queue"), 0);
//! ```

use async_stream::stream;
use shipping_bus_core::broker::{
    Acknowledger, BrokerError, BrokerFuture, BrokerSession, Delivery, DeliveryStream,
    OutboundMessage,
};
use shipping_bus_core::event::RoutingKey;
use shipping_bus_core::topology::{ExchangeDeclaration, Qos, QueueDeclaration};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Clone, Debug)]
struct StoredMessage {
    routing_key: RoutingKey,
    type_tag: Option<String>,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct QueueState {
    declaration: QueueDeclaration,
    ready: VecDeque<StoredMessage>,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct SessionState {
    open: bool,
    prefetch: u16,
    next_tag: u64,
    unacked: HashMap<u64, Unacked>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeDeclaration>,
    queues: HashMap<String, QueueState>,
    /// (exchange, routing key, queue)
    bindings: BTreeSet<(String, String, String)>,
    sessions: HashMap<u64, SessionState>,
    next_session: u64,
    consumer_epoch: u64,
    published: Vec<OutboundMessage>,
    declaration_fault: Option<String>,
    publish_fault: Option<String>,
    delivery_faults: VecDeque<String>,
}

impl BrokerState {
    fn session(&mut self, id: u64) -> Result<&mut SessionState, BrokerError> {
        match self.sessions.get_mut(&id) {
            Some(session) if session.open => Ok(session),
            _ => Err(BrokerError::SessionClosed),
        }
    }

    fn route(&mut self, exchange: &str, message: &StoredMessage) -> usize {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|(ex, key, _)| ex == exchange && key == message.routing_key.as_str())
            .map(|(_, _, queue)| queue.clone())
            .collect();
        for queue in &targets {
            if let Some(state) = self.queues.get_mut(queue) {
                state.ready.push_back(message.clone());
            }
        }
        targets.len()
    }

    fn requeue(&mut self, entry: Unacked) {
        if let Some(queue) = self.queues.get_mut(&entry.queue) {
            let mut message = entry.message;
            message.redelivered = true;
            queue.ready.push_front(message);
        }
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<BrokerState>,
    changed: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Next {
    Delivery(Delivery),
    Fault(BrokerError),
    Wait,
    Finished,
}

/// A broker living in process memory. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Create an empty broker: no exchanges, no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session.
    #[must_use]
    pub fn session(&self) -> InMemorySession {
        let mut state = self.inner.lock();
        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(
            id,
            SessionState {
                open: true,
                ..SessionState::default()
            },
        );
        InMemorySession {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Messages waiting in `queue`, not counting unacknowledged ones.
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages from `queue` delivered to some open session and not yet resolved.
    #[must_use]
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .sessions
            .values()
            .flat_map(|session| session.unacked.values())
            .filter(|entry| entry.queue == queue)
            .count()
    }

    /// Routing keys `queue` is bound with, sorted.
    #[must_use]
    pub fn bindings(&self, queue: &str) -> Vec<String> {
        self.inner
            .lock()
            .bindings
            .iter()
            .filter(|(_, _, q)| q == queue)
            .map(|(_, key, _)| key.clone())
            .collect()
    }

    /// Declared exchange, if any.
    #[must_use]
    pub fn exchange(&self, name: &str) -> Option<ExchangeDeclaration> {
        self.inner.lock().exchanges.get(name).cloned()
    }

    /// Declared queue, if any.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<QueueDeclaration> {
        self.inner
            .lock()
            .queues
            .get(name)
            .map(|q| q.declaration.clone())
    }

    /// Every message accepted by any session, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.inner.lock().published.clone()
    }

    /// Make every following declaration fail with `reason` (or succeed again with `None`).
    pub fn fail_declarations(&self, reason: Option<&str>) {
        self.inner.lock().declaration_fault = reason.map(str::to_string);
    }

    /// Make every following publish fail with `reason` (or succeed again with `None`).
    pub fn fail_publishes(&self, reason: Option<&str>) {
        self.inner.lock().publish_fault = reason.map(str::to_string);
    }

    /// Make the next consumer to poll receive an error item instead of a delivery.
    ///
    /// The stream stays open; faults queue up if called repeatedly.
    pub fn fail_next_delivery(&self, reason: &str) {
        self.inner
            .lock()
            .delivery_faults
            .push_back(reason.to_string());
        self.inner.changed.notify_waiters();
    }

    /// Enqueue a message as a foreign producer would, bypassing sessions.
    ///
    /// Returns the number of queues it was routed to.
    pub fn inject(
        &self,
        exchange: &str,
        routing_key: &str,
        type_tag: Option<&str>,
        body: Vec<u8>,
    ) -> usize {
        let message = StoredMessage {
            routing_key: RoutingKey::new(routing_key),
            type_tag: type_tag.map(str::to_string),
            body,
            redelivered: false,
        };
        let routed = self.inner.lock().route(exchange, &message);
        self.inner.changed.notify_waiters();
        routed
    }

    /// Delete a queue and its bindings, as an operator would.
    ///
    /// Pending messages are lost; deliveries in flight can no longer be requeued.
    pub fn delete_queue(&self, name: &str) {
        {
            let mut state = self.inner.lock();
            state.queues.remove(name);
            state.bindings.retain(|(_, _, q)| q != name);
        }
        self.inner.changed.notify_waiters();
    }

    /// Cancel every active consumer. Their delivery streams end; sessions stay
    /// open and unacknowledged messages stay with them.
    pub fn cancel_consumers(&self) {
        self.inner.lock().consumer_epoch += 1;
        self.inner.changed.notify_waiters();
    }
}

/// One session on an [`InMemoryBroker`].
pub struct InMemorySession {
    inner: Arc<Inner>,
    id: u64,
}

impl InMemorySession {
    /// Whether [`close`](BrokerSession::close) has been called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .sessions
            .get(&self.id)
            .is_some_and(|session| session.open)
    }

    fn next_delivery(inner: &Arc<Inner>, id: u64, queue: &str, epoch: u64) -> Next {
        let mut guard = inner.lock();
        let state = &mut *guard;
        if state.consumer_epoch != epoch {
            return Next::Finished;
        }
        let Some(session) = state.sessions.get(&id) else {
            return Next::Finished;
        };
        if !session.open {
            return Next::Finished;
        }
        if let Some(reason) = state.delivery_faults.pop_front() {
            return Next::Fault(BrokerError::ConsumeFailed(reason));
        }
        let prefetch = usize::from(session.prefetch);
        if prefetch > 0 && session.unacked.len() >= prefetch {
            return Next::Wait;
        }
        let Some(message) = state
            .queues
            .get_mut(queue)
            .and_then(|q| q.ready.pop_front())
        else {
            return Next::Wait;
        };

        let Some(session) = state.sessions.get_mut(&id) else {
            return Next::Finished;
        };
        session.next_tag += 1;
        let tag = session.next_tag;
        session.unacked.insert(
            tag,
            Unacked {
                queue: queue.to_string(),
                message: message.clone(),
            },
        );

        Next::Delivery(Delivery::new(
            message.routing_key,
            message.type_tag,
            message.body,
            tag,
            message.redelivered,
            Box::new(InMemoryAcker {
                inner: Arc::clone(inner),
                session: id,
            }),
        ))
    }
}

impl BrokerSession for InMemorySession {
    fn declare_exchange<'a>(&'a self, exchange: &'a ExchangeDeclaration) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock();
            state.session(self.id)?;
            let entity = format!("exchange '{}'", exchange.name);
            if let Some(reason) = state.declaration_fault.clone() {
                return Err(BrokerError::DeclarationFailed { entity, reason });
            }
            match state.exchanges.get(&exchange.name) {
                Some(existing) if existing != exchange => Err(BrokerError::DeclarationFailed {
                    entity,
                    reason: "PRECONDITION_FAILED - inequivalent arguments".to_string(),
                }),
                Some(_) => Ok(()),
                None => {
                    state
                        .exchanges
                        .insert(exchange.name.clone(), exchange.clone());
                    Ok(())
                }
            }
        })
    }

    fn declare_queue<'a>(&'a self, queue: &'a QueueDeclaration) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock();
            state.session(self.id)?;
            let entity = format!("queue '{}'", queue.name);
            if let Some(reason) = state.declaration_fault.clone() {
                return Err(BrokerError::DeclarationFailed { entity, reason });
            }
            match state.queues.get(&queue.name) {
                Some(existing) if existing.declaration != *queue => {
                    Err(BrokerError::DeclarationFailed {
                        entity,
                        reason: "PRECONDITION_FAILED - inequivalent arguments".to_string(),
                    })
                }
                Some(_) => Ok(()),
                None => {
                    state.queues.insert(
                        queue.name.clone(),
                        QueueState {
                            declaration: queue.clone(),
                            ready: VecDeque::new(),
                        },
                    );
                    Ok(())
                }
            }
        })
    }

    fn set_qos(&self, qos: Qos) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock();
            if let Some(reason) = state.declaration_fault.clone() {
                return Err(BrokerError::DeclarationFailed {
                    entity: "qos".to_string(),
                    reason,
                });
            }
            state.session(self.id)?.prefetch = qos.prefetch_count;
            Ok(())
        })
    }

    fn bind_queue<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        routing_key: &'a RoutingKey,
    ) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock();
            state.session(self.id)?;
            let entity = format!("binding '{queue}' -> '{exchange}' ({routing_key})");
            if let Some(reason) = state.declaration_fault.clone() {
                return Err(BrokerError::DeclarationFailed { entity, reason });
            }
            if !state.exchanges.contains_key(exchange) {
                return Err(BrokerError::DeclarationFailed {
                    entity,
                    reason: format!("NOT_FOUND - no exchange '{exchange}'"),
                });
            }
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::DeclarationFailed {
                    entity,
                    reason: format!("NOT_FOUND - no queue '{queue}'"),
                });
            }
            state.bindings.insert((
                exchange.to_string(),
                routing_key.as_str().to_string(),
                queue.to_string(),
            ));
            Ok(())
        })
    }

    fn publish<'a>(&'a self, exchange: &'a str, message: OutboundMessage) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            {
                let mut state = self.inner.lock();
                state.session(self.id)?;
                if let Some(reason) = state.publish_fault.clone() {
                    return Err(BrokerError::PublishFailed(reason));
                }
                if !state.exchanges.contains_key(exchange) {
                    return Err(BrokerError::PublishFailed(format!(
                        "NOT_FOUND - no exchange '{exchange}'"
                    )));
                }
                let stored = StoredMessage {
                    routing_key: message.routing_key.clone(),
                    type_tag: Some(message.type_tag.clone()).filter(|tag| !tag.is_empty()),
                    body: message.body.clone(),
                    redelivered: false,
                };
                state.route(exchange, &stored);
                state.published.push(message);
            }
            self.inner.changed.notify_waiters();
            Ok(())
        })
    }

    fn consume<'a>(
        &'a self,
        queue: &'a str,
        consumer_tag: &'a str,
    ) -> BrokerFuture<'a, DeliveryStream> {
        Box::pin(async move {
            let epoch = {
                let mut state = self.inner.lock();
                state.session(self.id)?;
                if !state.queues.contains_key(queue) {
                    return Err(BrokerError::ConsumeFailed(format!(
                        "NOT_FOUND - no queue '{queue}'"
                    )));
                }
                state.consumer_epoch
            };
            tracing::debug!(queue, consumer_tag, session = self.id, "Consumer registered");

            let inner = Arc::clone(&self.inner);
            let id = self.id;
            let queue = queue.to_string();
            let deliveries: DeliveryStream = Box::pin(stream! {
                loop {
                    let notified = inner.changed.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    match Self::next_delivery(&inner, id, &queue, epoch) {
                        Next::Delivery(delivery) => {
                            yield Ok(delivery);
                            tokio::task::yield_now().await;
                        }
                        Next::Fault(error) => yield Err(error),
                        Next::Finished => break,
                        Next::Wait => notified.await,
                    }
                }
            });
            Ok(deliveries)
        })
    }

    fn close(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            {
                let mut state = self.inner.lock();
                let Some(session) = state.sessions.get_mut(&self.id) else {
                    return Ok(());
                };
                if !session.open {
                    return Ok(());
                }
                session.open = false;
                let mut unacked: Vec<(u64, Unacked)> = session.unacked.drain().collect();
                unacked.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
                for (_, entry) in unacked {
                    state.requeue(entry);
                }
            }
            self.inner.changed.notify_waiters();
            Ok(())
        })
    }
}

struct InMemoryAcker {
    inner: Arc<Inner>,
    session: u64,
}

impl InMemoryAcker {
    fn resolve(&self, delivery_tag: u64, requeue: Option<bool>) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.lock();
            let entry = state
                .session(self.session)?
                .unacked
                .remove(&delivery_tag)
                .ok_or_else(|| BrokerError::AcknowledgementFailed {
                    delivery_tag,
                    reason: "PRECONDITION_FAILED - unknown delivery tag".to_string(),
                })?;
            if requeue == Some(true) {
                state.requeue(entry);
            }
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }
}

impl Acknowledger for InMemoryAcker {
    fn ack(self: Box<Self>, delivery_tag: u64) -> BrokerFuture<'static, ()> {
        Box::pin(async move { self.resolve(delivery_tag, None) })
    }

    fn nack(self: Box<Self>, delivery_tag: u64, requeue: bool) -> BrokerFuture<'static, ()> {
        Box::pin(async move { self.resolve(delivery_tag, Some(requeue)) })
    }
}
