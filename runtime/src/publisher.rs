//! Publisher: encode an event and hand it to the exchange.

use crate::metrics::EventBusMetrics;
use shipping_bus_core::broker::{BrokerSession, DeliveryMode, OutboundMessage};
use shipping_bus_core::event::{CONTENT_TYPE, IntegrationEvent, RoutingKey, encode};
use shipping_bus_core::event_bus::EventBusError;
use std::sync::Arc;

/// Publishes integration events to one exchange over a shared session.
///
/// No publisher confirms are requested: `Ok` means the local session accepted
/// the message.
#[derive(Clone)]
pub struct Publisher {
    session: Arc<dyn BrokerSession>,
    exchange: String,
}

impl Publisher {
    /// Create a publisher for `exchange`.
    #[must_use]
    pub fn new(session: Arc<dyn BrokerSession>, exchange: impl Into<String>) -> Self {
        Self {
            session,
            exchange: exchange.into(),
        }
    }

    /// Exchange messages are published to.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Encode `event` and publish it under `E::KIND`.
    ///
    /// The message is persistent, priority 0, with the event kind as its type
    /// tag and [`CONTENT_TYPE`] as its content type. Nothing is retried.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::Encoding`] if the event cannot be encoded; nothing is sent
    /// - [`EventBusError::PublishFailed`] if the session rejects the message
    pub async fn publish<E: IntegrationEvent>(&self, event: &E) -> Result<(), EventBusError> {
        let message = outbound(event)?;
        let routing_key = message.routing_key.clone();
        let size = message.body.len();

        match self.session.publish(&self.exchange, message).await {
            Ok(()) => {
                EventBusMetrics::record_publish(E::KIND);
                tracing::debug!(
                    exchange = %self.exchange,
                    routing_key = %routing_key,
                    size,
                    "Published event"
                );
                Ok(())
            }
            Err(source) => {
                EventBusMetrics::record_publish_error(E::KIND);
                tracing::warn!(
                    exchange = %self.exchange,
                    routing_key = %routing_key,
                    error = %source,
                    "Failed to publish event"
                );
                Err(EventBusError::PublishFailed {
                    routing_key,
                    source,
                })
            }
        }
    }
}

/// Build the broker message for an event.
///
/// # Errors
///
/// Returns [`EventBusError::Encoding`] if the event cannot be encoded.
pub fn outbound<E: IntegrationEvent>(event: &E) -> Result<OutboundMessage, EventBusError> {
    Ok(OutboundMessage {
        routing_key: RoutingKey::of::<E>(),
        type_tag: E::KIND.to_string(),
        content_type: CONTENT_TYPE.to_string(),
        delivery_mode: DeliveryMode::Persistent,
        priority: 0,
        body: encode(event)?,
    })
}
