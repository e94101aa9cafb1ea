//! Topology bootstrap.
//!
//! Declares the exchange and the service queue, then applies the prefetch
//! limit. Every step is idempotent on the broker side, so the same sequence
//! runs at construction and again from `EventBus::restore_topology`.

use shipping_bus_core::broker::BrokerSession;
use shipping_bus_core::event::RoutingKey;
use shipping_bus_core::event_bus::EventBusError;
use shipping_bus_core::topology::Topology;

/// Declare exchange, queue and QoS. Stops at the first failure.
///
/// # Errors
///
/// Returns [`EventBusError::TopologyFailed`] with the broker's reason.
pub async fn declare(
    session: &dyn BrokerSession,
    topology: &Topology,
) -> Result<(), EventBusError> {
    session
        .declare_exchange(&topology.exchange)
        .await
        .map_err(EventBusError::TopologyFailed)?;
    session
        .declare_queue(&topology.queue)
        .await
        .map_err(EventBusError::TopologyFailed)?;
    session
        .set_qos(topology.qos)
        .await
        .map_err(EventBusError::TopologyFailed)?;

    tracing::info!(
        exchange = %topology.exchange.name,
        queue = %topology.queue.name,
        prefetch = topology.qos.prefetch_count,
        "Topology declared"
    );
    Ok(())
}

/// Bind the service queue to the exchange for one event kind.
///
/// # Errors
///
/// Returns [`EventBusError::SubscriptionFailed`] if the broker refuses the binding.
pub async fn bind(
    session: &dyn BrokerSession,
    topology: &Topology,
    routing_key: &RoutingKey,
) -> Result<(), EventBusError> {
    session
        .bind_queue(&topology.queue.name, &topology.exchange.name, routing_key)
        .await
        .map_err(|source| EventBusError::SubscriptionFailed {
            routing_key: routing_key.clone(),
            source,
        })?;

    tracing::debug!(
        exchange = %topology.exchange.name,
        queue = %topology.queue.name,
        routing_key = %routing_key,
        "Queue bound"
    );
    Ok(())
}
