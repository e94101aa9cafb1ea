//! Event bus errors, lifecycle states and the error sink.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Booking service  │
//! └────────┬─────────┘
//!          │ 1. commit cargo state
//!          │ 2. publish(NewCargoBooked)   (no transaction spans 1 and 2)
//!          ▼
//! ┌──────────────────┐      ┌─────────────────┐
//! │ exchange         │─────►│ tracking.queue  │
//! │ "shipping"       │      └────────┬────────┘
//! └──────────────────┘               │ prefetch = 1
//!                                    ▼
//!                           ┌─────────────────┐
//!                           │   Dispatcher    │── ack on success
//!                           │ (one per bus)   │── nack+requeue on failure
//!                           └────────┬────────┘
//!                                    ▼
//!                           ┌─────────────────┐
//!                           │  EventHandler   │
//!                           └─────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: every delivery is either acknowledged after its
//!   handler succeeded or returned to the queue; handlers must be idempotent
//! - **Serialized handling**: one handler invocation at a time per bus
//! - **No hidden panics**: runtime failures go to an [`ErrorSink`]; without one
//!   they are logged

use crate::broker::BrokerError;
use crate::event::{CodecError, RoutingKey};
use crate::handler::HandlerError;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug)]
pub enum EventBusError {
    /// Failed to connect to the broker or to declare the topology.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] BrokerError),

    /// The topology could not be declared.
    #[error("Topology bootstrap failed: {0}")]
    TopologyFailed(#[source] BrokerError),

    /// An event could not be encoded; nothing was sent.
    #[error(transparent)]
    Encoding(#[from] CodecError),

    /// The broker rejected a publish.
    #[error("Publish failed for '{routing_key}': {source}")]
    PublishFailed {
        /// Routing key of the rejected message
        routing_key: RoutingKey,
        /// Broker error
        #[source]
        source: BrokerError,
    },

    /// The queue could not be bound for a subscription.
    #[error("Subscription failed for '{routing_key}': {source}")]
    SubscriptionFailed {
        /// Routing key being bound
        routing_key: RoutingKey,
        /// Broker error
        #[source]
        source: BrokerError,
    },

    /// A delivery's payload could not be decoded. The delivery was requeued.
    #[error("Delivery {delivery_tag} could not be decoded: {source}")]
    DecodeFailed {
        /// Delivery that failed
        delivery_tag: u64,
        /// Codec error
        #[source]
        source: CodecError,
    },

    /// A handler returned an error. The delivery was requeued.
    #[error("Handler for '{routing_key}' failed on delivery {delivery_tag}: {source}")]
    HandlerFailed {
        /// Event kind being handled
        routing_key: RoutingKey,
        /// Delivery that failed
        delivery_tag: u64,
        /// Handler error
        #[source]
        source: HandlerError,
    },

    /// An ack or nack could not be delivered to the broker.
    #[error("Acknowledgement failed: {0}")]
    AcknowledgementFailed(#[source] BrokerError),

    /// The delivery stream reported a transport error.
    #[error("Transport error: {0}")]
    TransportError(#[source] BrokerError),

    /// The bus was already started.
    #[error("Event bus already started")]
    AlreadyStarted,

    /// The bus is closed.
    #[error("Event bus closed")]
    Closed,
}

/// Lifecycle state of an event bus.
///
/// ```text
/// Idle ──start()──► Consuming ──close()──► Draining ──► Closed
///   └───────────────close()──────────────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BusState {
    /// Topology declared, not consuming yet
    Idle,
    /// Dispatcher running
    Consuming,
    /// Stop requested, waiting for the dispatcher
    Draining,
    /// Terminal
    Closed,
}

impl BusState {
    /// Whether the bus can no longer be used.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Draining | Self::Closed)
    }
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Consuming => f.write_str("consuming"),
            Self::Draining => f.write_str("draining"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Destination for runtime errors the dispatcher cannot return to a caller.
///
/// Handler failures, decode failures, acknowledgement failures and transport
/// errors below the handler level all end up here. Reporting must not block the
/// dispatcher.
pub trait ErrorSink: Send + Sync {
    /// Report one error.
    fn report(&self, error: EventBusError);
}

/// Error sink that writes structured log records.
///
/// Used when a bus is built without an explicit sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingErrorSink;

impl ErrorSink for LoggingErrorSink {
    fn report(&self, error: EventBusError) {
        tracing::error!(
            error = %error,
            source = ?std::error::Error::source(&error),
            "Event bus error"
        );
    }
}

impl ErrorSink for mpsc::UnboundedSender<EventBusError> {
    fn report(&self, error: EventBusError) {
        if let Err(mpsc::error::SendError(error)) = self.send(error) {
            tracing::error!(error = %error, "Error sink receiver dropped, logging instead");
        }
    }
}
