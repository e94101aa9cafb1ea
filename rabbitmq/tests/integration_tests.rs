//! Integration tests for [`RabbitMqSession`] with a real RabbitMQ instance.
//!
//! These tests use testcontainers to spin up RabbitMQ and validate:
//! - Topology declaration and binding
//! - Publish/subscribe round-trip through the event bus
//! - Message properties (type, content type, persistence)
//! - Redelivery after a failed handler
//! - Work sharing between instances consuming the same queue
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take several seconds per test to start the broker
//!
//! To run explicitly:
//! ```bash
//! cargo test -p shipping-bus-rabbitmq --test integration_tests -- --ignored
//! ```
//!
//! # Panics
//!
//! These tests use `expect()` and `panic!()` for setup failures, which is acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use shipping_bus_core::broker::BrokerSession;
use shipping_bus_core::event::{IntegrationEvent, RoutingKey};
use shipping_bus_core::handler::{EventHandler, HandlerError};
use shipping_bus_core::schema::{
    CargoWasHandled, HandlingEventType, NewCargoBooked, TransportStatus,
};
use shipping_bus_core::topology::{ExchangeDeclaration, QueueDeclaration};
use shipping_bus_rabbitmq::RabbitMqSession;
use shipping_bus_runtime::{BusConfig, EventBus};
use shipping_bus_testing::{RecordingErrorSink, fixtures, helpers};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::rabbitmq::RabbitMq;
use tokio::sync::mpsc;

const AMQP_PORT: u16 = 5672;

/// Start a broker and return it with its address.
async fn start_rabbitmq() -> (ContainerAsync<RabbitMq>, String) {
    helpers::init_tracing();
    let container = RabbitMq::default()
        .start()
        .await
        .expect("Failed to start RabbitMQ container");
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(AMQP_PORT)
        .await
        .expect("Failed to get AMQP port");
    (container, format!("amqp://guest:guest@{host}:{port}/%2f"))
}

/// Connect, retrying while the broker finishes booting.
async fn connect(uri: &str, name: &str) -> Arc<RabbitMqSession> {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        match RabbitMqSession::builder()
            .uri(uri)
            .connection_name(name)
            .connect()
            .await
        {
            Ok(session) => return Arc::new(session),
            Err(e) if attempt == max_attempts => {
                panic!("RabbitMQ failed to accept connections: {e}")
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(250)).await,
        }
    }
    unreachable!()
}

fn config(service: &str) -> BusConfig {
    BusConfig::builder(service)
        .drain_timeout(Duration::from_secs(2))
        .requeue_delay(Duration::from_millis(50))
        .build()
        .expect("valid config")
}

/// Forwards every event into a channel.
struct Forward<E> {
    events: mpsc::UnboundedSender<E>,
}

impl<E: IntegrationEvent> EventHandler<E> for Forward<E> {
    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        let _ = self.events.send(event);
        Ok(())
    }
}

/// Fails the first delivery, then forwards.
struct FailOnce {
    failed: AtomicBool,
    events: mpsc::UnboundedSender<(String, bool)>,
}

impl EventHandler<NewCargoBooked> for FailOnce {
    async fn handle(&self, event: NewCargoBooked) -> Result<(), HandlerError> {
        let first = !self.failed.swap(true, Ordering::SeqCst);
        let _ = self.events.send((event.tracking_id.clone(), first));
        if first {
            return Err(HandlerError::NotFound(event.tracking_id));
        }
        Ok(())
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Channel closed")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_publish_subscribe_round_trip() {
    let (_container, uri) = start_rabbitmq().await;

    let tracking = EventBus::builder(connect(&uri, "tracking").await, config("tracking"))
        .build()
        .await
        .expect("tracking bus");
    let (tx, mut rx) = mpsc::unbounded_channel();
    tracking
        .subscribe::<CargoWasHandled, _>(Forward { events: tx })
        .await
        .expect("subscribe");
    tracking.start().await.expect("start");

    let handling = EventBus::builder(connect(&uri, "handling").await, config("handling"))
        .build()
        .await
        .expect("handling bus");
    let event = fixtures::cargo_was_handled(
        "ABC123",
        TransportStatus::OnboardCarrier,
        "CNHKG",
        "V100",
        Some(fixtures::activity(HandlingEventType::Unload, "USNYC", "V100")),
    );
    handling.publish(&event).await.expect("publish");

    let received = recv(&mut rx).await;
    assert_eq!(received, event);

    tracking.close().await.expect("close tracking");
    handling.close().await.expect("close handling");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_messages_carry_type_and_persistence() {
    let (_container, uri) = start_rabbitmq().await;
    let session = connect(&uri, "inspector").await;

    session
        .declare_exchange(&ExchangeDeclaration::durable_direct("shipping"))
        .await
        .expect("exchange");
    session
        .declare_queue(&QueueDeclaration::durable_shared("inspector.queue"))
        .await
        .expect("queue");
    session
        .bind_queue(
            "inspector.queue",
            "shipping",
            &RoutingKey::from_static("NewCargoBooked"),
        )
        .await
        .expect("bind");

    let booking = EventBus::builder(connect(&uri, "booking").await, config("booking"))
        .build()
        .await
        .expect("booking bus");
    booking
        .publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .expect("publish");

    let mut deliveries = session
        .consume("inspector.queue", "inspector")
        .await
        .expect("consume");
    let delivery = tokio::time::timeout(Duration::from_secs(10), deliveries.next())
        .await
        .expect("Timed out waiting for delivery")
        .expect("stream ended")
        .expect("delivery error");

    assert_eq!(delivery.routing_key().as_str(), "NewCargoBooked");
    assert_eq!(delivery.type_tag(), Some("NewCargoBooked"));
    assert!(!delivery.redelivered());
    assert!(!delivery.body().is_empty());
    delivery.ack().await.expect("ack");

    booking.close().await.expect("close");
    assert!(session.is_connected());
    session.close().await.expect("close session");
    assert!(!session.is_connected());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_failed_handler_gets_redelivery() {
    let (_container, uri) = start_rabbitmq().await;
    let errors = RecordingErrorSink::new();

    let bus = EventBus::builder(connect(&uri, "tracking").await, config("tracking"))
        .error_sink(errors.clone())
        .build()
        .await
        .expect("bus");
    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe::<NewCargoBooked, _>(FailOnce {
        failed: AtomicBool::new(false),
        events: tx,
    })
    .await
    .expect("subscribe");
    bus.start().await.expect("start");

    bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .expect("publish");

    assert_eq!(recv(&mut rx).await, ("ABC123".to_string(), true));
    assert_eq!(recv(&mut rx).await, ("ABC123".to_string(), false));
    assert!(errors.wait_for(1, Duration::from_secs(5)).await);

    bus.close().await.expect("close");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_instances_share_the_service_queue() {
    let (_container, uri) = start_rabbitmq().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut instances = Vec::new();
    for instance in 0..2 {
        let bus = EventBus::builder(
            connect(&uri, &format!("tracking-{instance}")).await,
            config("tracking"),
        )
        .build()
        .await
        .expect("bus");
        bus.subscribe::<NewCargoBooked, _>(Forward { events: tx.clone() })
            .await
            .expect("subscribe");
        bus.start().await.expect("start");
        instances.push(bus);
    }

    let publisher = EventBus::builder(connect(&uri, "booking").await, config("booking"))
        .build()
        .await
        .expect("booking bus");
    for n in 0..10 {
        publisher
            .publish(&fixtures::new_cargo_booked(
                &format!("CRG{n:03}"),
                "SESTO",
                "USNYC",
            ))
            .await
            .expect("publish");
    }

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(recv(&mut rx).await.tracking_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10, "every booking handled exactly once");

    for bus in instances {
        bus.close().await.expect("close");
    }
    publisher.close().await.expect("close booking");
}
