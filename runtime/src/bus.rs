//! The event bus: lifecycle manager over one broker session.
//!
//! ```text
//!            build()                start()              close()
//! builder ───────────► Idle ─────────────────► Consuming ─────────► Draining ─► Closed
//!   │ bootstrap         │ ▲  stream ended          │
//!   │ (fatal on error)  │ └──────────────────────────┘
//!   ▼                   └──────────────close()──────────► Draining ─► Closed
//!  Err
//! ```
//!
//! The bus owns its registry and hands it to the dispatcher when consumption
//! starts. Publishing, subscribing and the dispatcher share the session.

use crate::bootstrap;
use crate::config::BusConfig;
use crate::dispatcher::Dispatcher;
use crate::publisher::Publisher;
use crate::registry::HandlerRegistry;
use shipping_bus_core::broker::BrokerSession;
use shipping_bus_core::event::{IntegrationEvent, RoutingKey};
use shipping_bus_core::event_bus::{BusState, ErrorSink, EventBusError, LoggingErrorSink};
use shipping_bus_core::handler::EventHandler;
use shipping_bus_core::topology::Topology;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Reliable publish/subscribe over a persistent broker.
///
/// # Example
///
/// ```ignore
/// use shipping_bus_runtime::{BusConfig, EventBus};
///
/// let session = RabbitMqSession::builder().uri(uri).connect().await?;
/// let bus = EventBus::builder(Arc::new(session), BusConfig::builder("tracking").build()?)
///     .error_sink(errors_tx)
///     .build()
///     .await?;
///
/// bus.subscribe::<NewCargoBooked, _>(StoreCargo::new(repository)).await?;
/// bus.start().await?;
/// // ...
/// bus.close().await?;
/// ```
pub struct EventBus {
    session: Arc<dyn BrokerSession>,
    config: BusConfig,
    topology: Topology,
    publisher: Publisher,
    registry: Arc<HandlerRegistry>,
    error_sink: Arc<dyn ErrorSink>,
    state: Arc<watch::Sender<BusState>>,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Start building a bus over `session`.
    #[must_use]
    pub fn builder(session: Arc<dyn BrokerSession>, config: BusConfig) -> EventBusBuilder {
        EventBusBuilder {
            session,
            config,
            error_sink: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BusState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<BusState> {
        self.state.subscribe()
    }

    /// Configuration the bus was built with.
    #[must_use]
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Declared topology.
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// A publisher sharing this bus's session, for callers that only publish.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Event kinds the queue is currently bound for.
    #[must_use]
    pub fn bindings(&self) -> Vec<RoutingKey> {
        self.registry.routing_keys()
    }

    fn ensure_open(&self) -> Result<(), EventBusError> {
        if self.state().is_terminal() {
            Err(EventBusError::Closed)
        } else {
            Ok(())
        }
    }

    /// Publish an event under its kind.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::Closed`] after [`close`](Self::close)
    /// - [`EventBusError::Encoding`] if the event cannot be encoded
    /// - [`EventBusError::PublishFailed`] if the broker rejects the message
    pub async fn publish<E: IntegrationEvent>(&self, event: &E) -> Result<(), EventBusError> {
        self.ensure_open()?;
        self.publisher.publish(event).await
    }

    /// Bind the service queue for `E::KIND` and register `handler` for it.
    ///
    /// Binding happens first: if it fails, the registry is unchanged. Subscribing
    /// again for the same kind replaces the previous handler.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::Closed`] after [`close`](Self::close)
    /// - [`EventBusError::SubscriptionFailed`] if the binding is refused
    pub async fn subscribe<E, H>(&self, handler: H) -> Result<(), EventBusError>
    where
        E: IntegrationEvent,
        H: EventHandler<E>,
    {
        self.ensure_open()?;

        let routing_key = RoutingKey::of::<E>();
        bootstrap::bind(self.session.as_ref(), &self.topology, &routing_key).await?;

        if self.registry.insert::<E, H>(handler) {
            tracing::warn!(
                routing_key = %routing_key,
                "Handler replaced; only the latest subscription receives events"
            );
        } else {
            tracing::info!(
                routing_key = %routing_key,
                queue = %self.topology.queue.name,
                "Subscribed"
            );
        }
        Ok(())
    }

    /// Begin consuming the service queue.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::AlreadyStarted`] while the dispatcher is running
    /// - [`EventBusError::Closed`] after [`close`](Self::close)
    /// - [`EventBusError::TransportError`] if the consumer cannot be registered
    pub async fn start(&self) -> Result<(), EventBusError> {
        let mut dispatcher = self.dispatcher.lock().await;

        match self.state() {
            BusState::Idle => {}
            BusState::Consuming => return Err(EventBusError::AlreadyStarted),
            BusState::Draining | BusState::Closed => return Err(EventBusError::Closed),
        }

        let deliveries = self
            .session
            .consume(&self.topology.queue.name, &self.config.consumer_tag())
            .await
            .map_err(EventBusError::TransportError)?;

        let task = Dispatcher {
            deliveries,
            registry: Arc::clone(&self.registry),
            error_sink: Arc::clone(&self.error_sink),
            shutdown: self.shutdown.subscribe(),
            state: Arc::clone(&self.state),
            requeue_delay: self.config.requeue_delay,
        };

        self.state.send_replace(BusState::Consuming);
        *dispatcher = Some(tokio::spawn(task.run()));

        tracing::info!(
            queue = %self.topology.queue.name,
            bindings = self.registry.len(),
            "Event bus consuming"
        );
        Ok(())
    }

    /// Stop consuming and close the session.
    ///
    /// The dispatcher is signalled first, then the session is closed, so a
    /// delivery whose handler is still running stays unacknowledged and is
    /// redelivered by the broker. The running handler is not interrupted; the
    /// bus waits for it up to the configured drain timeout and then detaches it.
    ///
    /// Calling `close` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the session close handshake
    /// failed. The bus is `Closed` either way.
    pub async fn close(&self) -> Result<(), EventBusError> {
        let mut dispatcher = self.dispatcher.lock().await;

        if self.state() == BusState::Closed {
            return Ok(());
        }

        self.state.send_replace(BusState::Draining);
        self.shutdown.send_replace(true);
        tracing::info!("Event bus draining");

        let closed = self.session.close().await;
        if let Err(error) = &closed {
            tracing::warn!(error = %error, "Session close failed");
        }

        if let Some(task) = dispatcher.take() {
            match tokio::time::timeout(self.config.drain_timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(error = %error, "Dispatcher task failed");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = u64::try_from(self.config.drain_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                        "Handler still running after drain timeout; leaving it to finish"
                    );
                }
            }
        }

        self.state.send_replace(BusState::Closed);
        tracing::info!("Event bus closed");

        closed.map_err(EventBusError::ConnectionFailed)
    }

    /// Re-declare the topology and reissue every registered binding.
    ///
    /// Called after an external reconnection layer has re-established the
    /// session, before consumption resumes.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::Closed`] after [`close`](Self::close)
    /// - [`EventBusError::TopologyFailed`] or [`EventBusError::SubscriptionFailed`]
    pub async fn restore_topology(&self) -> Result<(), EventBusError> {
        self.ensure_open()?;

        bootstrap::declare(self.session.as_ref(), &self.topology).await?;
        let bindings = self.registry.routing_keys();
        for routing_key in &bindings {
            bootstrap::bind(self.session.as_ref(), &self.topology, routing_key).await?;
        }

        tracing::info!(bindings = bindings.len(), "Topology restored");
        Ok(())
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Builder for [`EventBus`].
#[must_use]
pub struct EventBusBuilder {
    session: Arc<dyn BrokerSession>,
    config: BusConfig,
    error_sink: Option<Arc<dyn ErrorSink>>,
}

impl EventBusBuilder {
    /// Where runtime errors go. Defaults to [`LoggingErrorSink`].
    pub fn error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Run the topology bootstrap and return an idle bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::TopologyFailed`] if any declaration fails. Nothing
    /// is retried.
    pub async fn build(self) -> Result<EventBus, EventBusError> {
        let topology = self.config.topology();
        bootstrap::declare(self.session.as_ref(), &topology).await?;

        let error_sink = self.error_sink.unwrap_or_else(|| {
            tracing::info!("No error sink configured, runtime errors will be logged");
            Arc::new(LoggingErrorSink)
        });
        let (shutdown, _) = watch::channel(false);
        let (state, _) = watch::channel(BusState::Idle);

        Ok(EventBus {
            publisher: Publisher::new(Arc::clone(&self.session), topology.exchange.name.clone()),
            session: self.session,
            config: self.config,
            topology,
            registry: Arc::new(HandlerRegistry::new()),
            error_sink,
            state: Arc::new(state),
            shutdown,
            dispatcher: Mutex::new(None),
        })
    }
}
