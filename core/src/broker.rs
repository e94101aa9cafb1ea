//! Broker session abstraction.
//!
//! A [`BrokerSession`] is one multiplexed channel over a broker connection. It
//! scopes declarations, publishing and the delivery stream. The event bus only
//! ever talks to the broker through this trait, which keeps the dispatcher
//! testable against an in-memory broker and lets the AMQP client live in its
//! own crate.
//!
//! # Implementations
//!
//! - `RabbitMqSession` (`shipping-bus-rabbitmq`) - AMQP 0-9-1 over TCP or TLS
//! - `InMemorySession` (`shipping-bus-testing`) - for tests
//!
//! # Acknowledgement
//!
//! A [`Delivery`] is resolved by consuming it: [`Delivery::ack`] and
//! [`Delivery::nack`] both take `self`, so a delivery can never be acknowledged
//! twice or both acknowledged and rejected.

use crate::event::RoutingKey;
use crate::topology::{ExchangeDeclaration, Qos, QueueDeclaration};
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by broker operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Stream of inbound deliveries for one consumer.
///
/// The stream ends when the session or connection closes.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Errors reported by a broker session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Could not open the connection or session
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An exchange, queue or binding declaration was refused
    #[error("Declaration of {entity} failed: {reason}")]
    DeclarationFailed {
        /// Entity being declared (e.g. `exchange 'shipping'`)
        entity: String,
        /// Broker-provided reason
        reason: String,
    },

    /// The broker rejected a publish
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Could not start or continue consuming
    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    /// An acknowledgement could not be delivered to the broker
    #[error("Acknowledgement of delivery {delivery_tag} failed: {reason}")]
    AcknowledgementFailed {
        /// Delivery the acknowledgement was for
        delivery_tag: u64,
        /// Broker-provided reason
        reason: String,
    },

    /// The session is closed
    #[error("Session closed")]
    SessionClosed,
}

/// Persistence of a published message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Kept in memory only
    Transient,
    /// Written to disk by a durable queue
    #[default]
    Persistent,
}

impl DeliveryMode {
    /// AMQP `delivery-mode` property value.
    #[must_use]
    pub const fn as_amqp(self) -> u8 {
        match self {
            Self::Transient => 1,
            Self::Persistent => 2,
        }
    }
}

/// A message on its way to the exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Routing key used by the exchange
    pub routing_key: RoutingKey,
    /// Type tag stored in the message properties
    pub type_tag: String,
    /// Encoding of `body`
    pub content_type: String,
    /// Persistence mode
    pub delivery_mode: DeliveryMode,
    /// Message priority (0-9)
    pub priority: u8,
    /// Encoded payload
    pub body: Vec<u8>,
}

/// Resolves a delivery on the broker side.
///
/// Implemented by each broker backend; consumed by [`Delivery`].
pub trait Acknowledger: Send + Sync {
    /// Positively acknowledge the delivery.
    fn ack(self: Box<Self>, delivery_tag: u64) -> BrokerFuture<'static, ()>;

    /// Negatively acknowledge the delivery, optionally returning it to the queue.
    fn nack(self: Box<Self>, delivery_tag: u64, requeue: bool) -> BrokerFuture<'static, ()>;
}

/// An inbound message awaiting an acknowledgement decision.
pub struct Delivery {
    routing_key: RoutingKey,
    type_tag: Option<String>,
    body: Vec<u8>,
    delivery_tag: u64,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Assemble a delivery. Called by broker backends.
    #[must_use]
    pub fn new(
        routing_key: RoutingKey,
        type_tag: Option<String>,
        body: Vec<u8>,
        delivery_tag: u64,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key,
            type_tag,
            body,
            delivery_tag,
            redelivered,
            acker,
        }
    }

    /// Routing key the message was published with.
    #[must_use]
    pub const fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    /// Type tag from the message properties, if the producer set one.
    #[must_use]
    pub fn type_tag(&self) -> Option<&str> {
        self.type_tag.as_deref()
    }

    /// Key used to look up a handler: the type tag, or the routing key when the
    /// producer did not set one.
    #[must_use]
    pub fn event_kind(&self) -> &str {
        self.type_tag
            .as_deref()
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| self.routing_key.as_str())
    }

    /// Encoded payload.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Broker-assigned tag, unique within the session.
    #[must_use]
    pub const fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker delivered this message before.
    #[must_use]
    pub const fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge: the message is removed from the queue permanently.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgementFailed`] or
    /// [`BrokerError::SessionClosed`] if the broker could not be told.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack(self.delivery_tag).await
    }

    /// Reject: with `requeue` the message returns to the queue for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgementFailed`] or
    /// [`BrokerError::SessionClosed`] if the broker could not be told.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("type_tag", &self.type_tag)
            .field("body_len", &self.body.len())
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

/// One session (channel) on a broker connection.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the bus can hold an `Arc<dyn BrokerSession>`
/// shared by the publisher, the subscriber path and the dispatcher.
pub trait BrokerSession: Send + Sync {
    /// Declare an exchange. A no-op if it already exists with the same attributes.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclarationFailed`] if the broker refuses, including
    /// when an exchange of that name exists with different attributes.
    fn declare_exchange<'a>(&'a self, exchange: &'a ExchangeDeclaration) -> BrokerFuture<'a, ()>;

    /// Declare a queue. A no-op if it already exists with the same attributes.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclarationFailed`] if the broker refuses.
    fn declare_queue<'a>(&'a self, queue: &'a QueueDeclaration) -> BrokerFuture<'a, ()>;

    /// Apply a prefetch limit to subsequent consumers on this session.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclarationFailed`] if the broker refuses.
    fn set_qos(&self, qos: Qos) -> BrokerFuture<'_, ()>;

    /// Bind `queue` to `exchange` for one routing key. Rebinding is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclarationFailed`] if either side does not exist.
    fn bind_queue<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        routing_key: &'a RoutingKey,
    ) -> BrokerFuture<'a, ()>;

    /// Publish a message to an exchange.
    ///
    /// Success means the session accepted the message, not that the broker
    /// stored it durably.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] or [`BrokerError::SessionClosed`].
    fn publish<'a>(&'a self, exchange: &'a str, message: OutboundMessage) -> BrokerFuture<'a, ()>;

    /// Start consuming a queue with manual acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConsumeFailed`] if the consumer cannot be registered.
    fn consume<'a>(&'a self, queue: &'a str, consumer_tag: &'a str)
    -> BrokerFuture<'a, DeliveryStream>;

    /// Close the session and its connection.
    ///
    /// Deliveries that are still unacknowledged return to their queue and are
    /// redelivered to the next consumer.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the close handshake fails.
    fn close(&self) -> BrokerFuture<'_, ()>;
}
