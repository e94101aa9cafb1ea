//! Behaviour of [`EventBus`] against the in-memory broker.
//!
//! Covers delivery guarantees (at-least-once, no loss without a handler,
//! no cross-dispatch, serialized handling, redelivery after close), fairness of
//! the consumer loop toward other tasks, and the lifecycle contract.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)]

use shipping_bus_core::broker::{BrokerError, BrokerSession};
use shipping_bus_core::event::{IntegrationEvent, encode};
use shipping_bus_core::event_bus::{BusState, EventBusError};
use shipping_bus_core::handler::{EventHandler, HandlerError};
use shipping_bus_core::schema::{CargoDestinationChanged, CargoWasHandled, NewCargoBooked};
use shipping_bus_core::topology::ExchangeKind;
use shipping_bus_runtime::{BusConfig, EventBus};
use shipping_bus_testing::{InMemoryBroker, RecordingErrorSink, fixtures, helpers};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

const QUEUE: &str = "tracking.queue";

fn config() -> BusConfig {
    BusConfig::builder("tracking")
        .drain_timeout(Duration::from_millis(200))
        .build()
        .unwrap()
}

async fn bus_with(
    broker: &InMemoryBroker,
    errors: &RecordingErrorSink,
    config: BusConfig,
) -> EventBus {
    helpers::init_tracing();
    EventBus::builder(Arc::new(broker.session()), config)
        .error_sink(errors.clone())
        .build()
        .await
        .unwrap()
}

/// Poll `condition` until it holds or two seconds pass.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Records every event it is given.
struct Collect<E> {
    seen: Arc<Mutex<Vec<E>>>,
}

impl<E> Collect<E> {
    fn new() -> (Self, Arc<Mutex<Vec<E>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

impl<E: IntegrationEvent> EventHandler<E> for Collect<E> {
    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(event);
        Ok(())
    }
}

/// Fails a fixed number of times, then succeeds.
struct FailThenSucceed {
    failures_left: AtomicUsize,
    calls: Arc<AtomicUsize>,
}

impl EventHandler<NewCargoBooked> for FailThenSucceed {
    async fn handle(&self, event: NewCargoBooked) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(HandlerError::NotFound(event.tracking_id));
        }
        Ok(())
    }
}

#[tokio::test]
async fn booked_cargo_reaches_subscriber_and_is_acknowledged() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let (handler, seen) = Collect::<NewCargoBooked>::new();
    bus.subscribe::<NewCargoBooked, _>(handler).await.unwrap();
    bus.start().await.unwrap();

    let unacked_before = broker.unacked_count(QUEUE);
    bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .unwrap();

    assert!(eventually(|| seen.lock().unwrap().len() == 1).await);
    let received = seen.lock().unwrap()[0].clone();
    assert_eq!(received.tracking_id, "ABC123");
    assert_eq!(received.origin, "SESTO");
    assert_eq!(received.destination, "USNYC");

    assert!(eventually(|| broker.unacked_count(QUEUE) == unacked_before).await);
    assert_eq!(broker.queue_depth(QUEUE), 0);
    assert!(errors.is_empty());

    bus.close().await.unwrap();
}

#[tokio::test]
async fn failing_handler_is_retried_until_it_succeeds() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe::<NewCargoBooked, _>(FailThenSucceed {
        failures_left: AtomicUsize::new(3),
        calls: Arc::clone(&calls),
    })
    .await
    .unwrap();
    bus.start().await.unwrap();

    bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .unwrap();

    assert!(eventually(|| calls.load(Ordering::SeqCst) == 4).await);
    assert!(
        eventually(|| broker.unacked_count(QUEUE) == 0 && broker.queue_depth(QUEUE) == 0).await
    );

    // Settled: no further invocations once acknowledged.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let reported = errors.take();
    assert_eq!(reported.len(), 3);
    assert!(reported.iter().all(|e| matches!(
        e,
        EventBusError::HandlerFailed { routing_key, .. } if routing_key.as_str() == "NewCargoBooked"
    )));

    bus.close().await.unwrap();
}

#[tokio::test]
async fn delivery_without_handler_stays_queued_until_one_registers() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let config = BusConfig::builder("tracking")
        .requeue_delay(Duration::from_millis(5))
        .build()
        .unwrap();
    let bus = bus_with(&broker, &errors, config).await;

    let (booked, booked_seen) = Collect::<NewCargoBooked>::new();
    bus.subscribe::<NewCargoBooked, _>(booked).await.unwrap();
    bus.start().await.unwrap();

    // A producer tags the message with a kind nobody handles yet.
    let handled = fixtures::cargo_was_handled(
        "ABC123",
        shipping_bus_core::schema::TransportStatus::InPort,
        "SESTO",
        "",
        None,
    );
    let routed = broker.inject(
        "shipping",
        "NewCargoBooked",
        Some(CargoWasHandled::KIND),
        encode(&handled).unwrap(),
    );
    assert_eq!(routed, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.queue_depth(QUEUE) + broker.unacked_count(QUEUE), 1);
    assert!(booked_seen.lock().unwrap().is_empty());
    assert!(errors.is_empty(), "missing handler is not an error: {:?}", errors.messages());

    let (handler, seen) = Collect::<CargoWasHandled>::new();
    bus.subscribe::<CargoWasHandled, _>(handler).await.unwrap();

    assert!(eventually(|| seen.lock().unwrap().len() == 1).await);
    assert_eq!(seen.lock().unwrap()[0], handled);
    assert!(eventually(|| broker.queue_depth(QUEUE) + broker.unacked_count(QUEUE) == 0).await);

    bus.close().await.unwrap();
}

#[tokio::test]
async fn unhandled_kind_with_default_config_leaves_room_to_subscribe() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, BusConfig::builder("tracking").build().unwrap()).await;

    let (booked, _) = Collect::<NewCargoBooked>::new();
    bus.subscribe::<NewCargoBooked, _>(booked).await.unwrap();
    bus.start().await.unwrap();

    let handled = fixtures::cargo_was_handled(
        "ABC123",
        shipping_bus_core::schema::TransportStatus::InPort,
        "SESTO",
        "",
        None,
    );
    broker.inject(
        "shipping",
        "NewCargoBooked",
        Some(CargoWasHandled::KIND),
        encode(&handled).unwrap(),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The dispatcher keeps bouncing the message; this task must still get to run.
    let (handler, seen) = Collect::<CargoWasHandled>::new();
    tokio::time::timeout(
        Duration::from_secs(2),
        bus.subscribe::<CargoWasHandled, _>(handler),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(eventually(|| seen.lock().unwrap().len() == 1).await);
    assert!(errors.is_empty(), "{:?}", errors.messages());

    tokio::time::timeout(Duration::from_secs(2), bus.close())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn permanently_failing_message_with_default_config_does_not_stall_the_runtime() {
    struct AlwaysFail;
    impl EventHandler<NewCargoBooked> for AlwaysFail {
        async fn handle(&self, event: NewCargoBooked) -> Result<(), HandlerError> {
            Err(HandlerError::Rejected(format!("corrupt booking {}", event.tracking_id)))
        }
    }

    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, BusConfig::builder("tracking").build().unwrap()).await;
    bus.subscribe::<NewCargoBooked, _>(AlwaysFail).await.unwrap();
    bus.start().await.unwrap();

    bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .unwrap();

    assert!(errors.wait_for(3, Duration::from_secs(2)).await);
    assert!(errors.take().iter().all(|e| matches!(
        e,
        EventBusError::HandlerFailed { source: HandlerError::Rejected(_), .. }
    )));

    // Timers still fire while the message is bounced.
    tokio::time::timeout(Duration::from_secs(1), tokio::time::sleep(Duration::from_millis(10)))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), bus.close())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bus.state(), BusState::Closed);
    assert_eq!(broker.queue_depth(QUEUE), 1);
}

#[tokio::test]
async fn events_only_reach_the_handler_for_their_kind() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = Arc::new(bus_with(&broker, &errors, config()).await);

    let (booked, booked_seen) = Collect::<NewCargoBooked>::new();
    let (changed, changed_seen) = Collect::<CargoDestinationChanged>::new();
    bus.subscribe::<NewCargoBooked, _>(booked).await.unwrap();
    bus.subscribe::<CargoDestinationChanged, _>(changed).await.unwrap();
    bus.start().await.unwrap();

    let mut publishers = Vec::new();
    for i in 0..10 {
        let bus = Arc::clone(&bus);
        publishers.push(tokio::spawn(async move {
            let id = format!("C{i:03}");
            if i % 2 == 0 {
                bus.publish(&fixtures::new_cargo_booked(&id, "SESTO", "USNYC"))
                    .await
            } else {
                bus.publish(&fixtures::cargo_destination_changed(&id, "CNHKG"))
                    .await
            }
        }));
    }
    for publisher in publishers {
        publisher.await.unwrap().unwrap();
    }

    assert!(eventually(|| booked_seen.lock().unwrap().len() == 5
        && changed_seen.lock().unwrap().len() == 5)
    .await);

    let booked_ids: Vec<String> = booked_seen
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.tracking_id.clone())
        .collect();
    let changed_ids: Vec<String> = changed_seen
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.tracking_id.clone())
        .collect();
    assert!(booked_ids.iter().all(|id| id[1..].parse::<u32>().unwrap() % 2 == 0));
    assert!(changed_ids.iter().all(|id| id[1..].parse::<u32>().unwrap() % 2 == 1));
    assert!(changed_seen
        .lock()
        .unwrap()
        .iter()
        .all(|e| e.destination == "CNHKG"));
    assert!(errors.is_empty());

    bus.close().await.unwrap();
}

/// Flags any overlap between invocations.
struct Exclusive {
    in_flight: AtomicBool,
    overlapped: Arc<AtomicBool>,
    done: Arc<AtomicUsize>,
}

impl Exclusive {
    async fn enter(&self) -> Result<(), HandlerError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.store(false, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl EventHandler<NewCargoBooked> for Exclusive {
    async fn handle(&self, _event: NewCargoBooked) -> Result<(), HandlerError> {
        self.enter().await
    }
}

impl EventHandler<CargoDestinationChanged> for Exclusive {
    async fn handle(&self, _event: CargoDestinationChanged) -> Result<(), HandlerError> {
        self.enter().await
    }
}

#[tokio::test]
async fn handler_invocations_never_overlap() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let overlapped = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(Exclusive {
        in_flight: AtomicBool::new(false),
        overlapped: Arc::clone(&overlapped),
        done: Arc::clone(&done),
    });
    bus.subscribe::<NewCargoBooked, _>(Arc::clone(&handler))
        .await
        .unwrap();
    bus.subscribe::<CargoDestinationChanged, _>(Arc::clone(&handler))
        .await
        .unwrap();
    bus.start().await.unwrap();

    for i in 0..4 {
        bus.publish(&fixtures::new_cargo_booked(&format!("B{i}"), "SESTO", "USNYC"))
            .await
            .unwrap();
        bus.publish(&fixtures::cargo_destination_changed(&format!("D{i}"), "CNHKG"))
            .await
            .unwrap();
    }

    assert!(eventually(|| done.load(Ordering::SeqCst) == 8).await);
    assert!(!overlapped.load(Ordering::SeqCst));

    bus.close().await.unwrap();
}

/// Signals entry, then waits to be released.
struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl EventHandler<NewCargoBooked> for Gate {
    async fn handle(&self, _event: NewCargoBooked) -> Result<(), HandlerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn close_during_handler_leaves_message_for_redelivery() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    bus.subscribe::<NewCargoBooked, _>(Gate {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    })
    .await
    .unwrap();
    bus.start().await.unwrap();
    bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .unwrap();

    entered.notified().await;
    bus.close().await.unwrap();
    assert_eq!(bus.state(), BusState::Closed);

    // The in-flight message went back to the queue, not acknowledged.
    assert_eq!(broker.queue_depth(QUEUE), 1);

    let next_consumer = broker.session();
    let mut deliveries = next_consumer.consume(QUEUE, "next").await.unwrap();
    let redelivered = futures::StreamExt::next(&mut deliveries)
        .await
        .unwrap()
        .unwrap();
    assert!(redelivered.redelivered());
    assert_eq!(redelivered.event_kind(), "NewCargoBooked");

    // Let the detached handler finish; its late ack is dropped quietly.
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(errors.is_empty(), "{:?}", errors.messages());
}

#[tokio::test]
async fn undecodable_payload_is_requeued_and_reported() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let config = BusConfig::builder("tracking")
        .requeue_delay(Duration::from_millis(20))
        .build()
        .unwrap();
    let bus = bus_with(&broker, &errors, config).await;

    let (handler, seen) = Collect::<NewCargoBooked>::new();
    bus.subscribe::<NewCargoBooked, _>(handler).await.unwrap();
    bus.start().await.unwrap();

    broker.inject(
        "shipping",
        "NewCargoBooked",
        Some("NewCargoBooked"),
        vec![0xff, 0xff, 0xff],
    );

    assert!(errors.wait_for(1, Duration::from_secs(2)).await);
    assert!(matches!(
        errors.take().first(),
        Some(EventBusError::DecodeFailed { .. })
    ));
    assert!(seen.lock().unwrap().is_empty());

    bus.close().await.unwrap();
    assert_eq!(broker.queue_depth(QUEUE), 1);
}

#[tokio::test]
async fn handler_errors_reach_a_channel_sink() {
    struct Reject;
    impl EventHandler<CargoDestinationChanged> for Reject {
        async fn handle(&self, event: CargoDestinationChanged) -> Result<(), HandlerError> {
            Err(HandlerError::Rejected(format!("cannot route to {}", event.destination)))
        }
    }

    let broker = InMemoryBroker::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = BusConfig::builder("tracking")
        .requeue_delay(Duration::from_millis(10))
        .build()
        .unwrap();
    let bus = EventBus::builder(Arc::new(broker.session()), config)
        .error_sink(tx)
        .build()
        .await
        .unwrap();

    bus.subscribe::<CargoDestinationChanged, _>(Reject).await.unwrap();
    bus.start().await.unwrap();
    bus.publish(&fixtures::cargo_destination_changed("ABC123", "XXXXX"))
        .await
        .unwrap();

    let error = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match error {
        EventBusError::HandlerFailed {
            routing_key,
            source: HandlerError::Rejected(reason),
            ..
        } => {
            assert_eq!(routing_key.as_str(), "CargoDestinationChanged");
            assert_eq!(reason, "cannot route to XXXXX");
        }
        other => panic!("unexpected error: {other}"),
    }

    bus.close().await.unwrap();
}

#[tokio::test]
async fn build_declares_durable_topology_and_applies_prefetch() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let exchange = broker.exchange("shipping").unwrap();
    assert_eq!(exchange.kind, ExchangeKind::Direct);
    assert!(exchange.durable);

    let queue = broker.queue(QUEUE).unwrap();
    assert!(queue.durable);
    assert!(!queue.exclusive);
    assert!(!queue.auto_delete);

    assert_eq!(bus.state(), BusState::Idle);
    assert_eq!(bus.topology().qos.prefetch_count, 1);
    assert!(bus.bindings().is_empty());
}

#[tokio::test]
async fn declaration_failure_is_fatal_to_build() {
    let broker = InMemoryBroker::new();
    broker.fail_declarations(Some("ACCESS_REFUSED"));

    let result = EventBus::builder(Arc::new(broker.session()), config())
        .build()
        .await;
    assert!(matches!(result, Err(EventBusError::TopologyFailed(_))));
}

#[tokio::test]
async fn failed_binding_leaves_registry_unchanged() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    broker.fail_declarations(Some("ACCESS_REFUSED"));
    let (handler, _) = Collect::<NewCargoBooked>::new();
    let result = bus.subscribe::<NewCargoBooked, _>(handler).await;

    assert!(matches!(result, Err(EventBusError::SubscriptionFailed { .. })));
    assert!(bus.bindings().is_empty());
}

#[tokio::test]
async fn rejected_publish_is_returned_to_the_caller() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    broker.fail_publishes(Some("channel closed"));
    let result = bus
        .publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await;

    match result {
        Err(EventBusError::PublishFailed { routing_key, .. }) => {
            assert_eq!(routing_key.as_str(), "NewCargoBooked");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn published_messages_are_persistent_and_typed() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    bus.publish(&fixtures::cargo_destination_changed("ABC123", "USNYC"))
        .await
        .unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].routing_key.as_str(), "CargoDestinationChanged");
    assert_eq!(published[0].type_tag, "CargoDestinationChanged");
    assert_eq!(published[0].content_type, "application/x-protobuf");
    assert_eq!(published[0].delivery_mode.as_amqp(), 2);
    assert_eq!(published[0].priority, 0);
}

#[tokio::test]
async fn lifecycle_transitions_and_closed_operations() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;
    let mut states = bus.watch_state();

    bus.start().await.unwrap();
    assert_eq!(*states.borrow_and_update(), BusState::Consuming);
    assert!(matches!(bus.start().await, Err(EventBusError::AlreadyStarted)));

    bus.close().await.unwrap();
    assert_eq!(bus.state(), BusState::Closed);
    bus.close().await.unwrap();

    let (handler, _) = Collect::<NewCargoBooked>::new();
    assert!(matches!(
        bus.subscribe::<NewCargoBooked, _>(handler).await,
        Err(EventBusError::Closed)
    ));
    assert!(matches!(
        bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
            .await,
        Err(EventBusError::Closed)
    ));
    assert!(matches!(bus.start().await, Err(EventBusError::Closed)));
    assert!(matches!(bus.restore_topology().await, Err(EventBusError::Closed)));
}

#[tokio::test]
async fn closing_an_idle_bus_is_allowed() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    bus.close().await.unwrap();
    assert_eq!(bus.state(), BusState::Closed);
}

#[tokio::test]
async fn ended_stream_returns_bus_to_idle_and_it_can_restart() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let (handler, seen) = Collect::<NewCargoBooked>::new();
    bus.subscribe::<NewCargoBooked, _>(handler).await.unwrap();
    bus.start().await.unwrap();

    let mut states = bus.watch_state();
    broker.cancel_consumers();
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|state| *state == BusState::Idle),
    )
    .await
    .unwrap()
    .unwrap();

    bus.restore_topology().await.unwrap();
    bus.start().await.unwrap();
    bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .unwrap();
    assert!(eventually(|| seen.lock().unwrap().len() == 1).await);

    bus.close().await.unwrap();
}

#[tokio::test]
async fn transport_error_is_reported_and_consumption_continues() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let (handler, seen) = Collect::<NewCargoBooked>::new();
    bus.subscribe::<NewCargoBooked, _>(handler).await.unwrap();
    bus.start().await.unwrap();

    broker.fail_next_delivery("frame decode error");

    assert!(errors.wait_for(1, Duration::from_secs(2)).await);
    match errors.take().as_slice() {
        [EventBusError::TransportError(BrokerError::ConsumeFailed(reason))] => {
            assert_eq!(reason, "frame decode error");
        }
        other => panic!("unexpected errors: {other:?}"),
    }
    assert_eq!(bus.state(), BusState::Consuming);

    bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .unwrap();
    assert!(eventually(|| seen.lock().unwrap().len() == 1).await);
    assert!(errors.is_empty());

    bus.close().await.unwrap();
}

#[tokio::test]
async fn restore_topology_redeclares_queue_and_bindings() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let (booked, _) = Collect::<NewCargoBooked>::new();
    let (handled, _) = Collect::<CargoWasHandled>::new();
    bus.subscribe::<NewCargoBooked, _>(booked).await.unwrap();
    bus.subscribe::<CargoWasHandled, _>(handled).await.unwrap();

    broker.delete_queue(QUEUE);
    assert!(broker.queue(QUEUE).is_none());
    assert!(broker.bindings(QUEUE).is_empty());

    bus.restore_topology().await.unwrap();

    assert!(broker.queue(QUEUE).is_some());
    assert_eq!(broker.bindings(QUEUE), vec!["CargoWasHandled", "NewCargoBooked"]);
}

#[tokio::test]
async fn resubscribing_replaces_the_handler() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let bus = bus_with(&broker, &errors, config()).await;

    let (first, first_seen) = Collect::<NewCargoBooked>::new();
    let (second, second_seen) = Collect::<NewCargoBooked>::new();
    bus.subscribe::<NewCargoBooked, _>(first).await.unwrap();
    bus.subscribe::<NewCargoBooked, _>(second).await.unwrap();
    assert_eq!(broker.bindings(QUEUE), vec!["NewCargoBooked"]);

    bus.start().await.unwrap();
    bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC"))
        .await
        .unwrap();

    assert!(eventually(|| second_seen.lock().unwrap().len() == 1).await);
    assert!(first_seen.lock().unwrap().is_empty());

    bus.close().await.unwrap();
}

#[tokio::test]
async fn instances_sharing_a_queue_split_the_work() {
    let broker = InMemoryBroker::new();
    let errors = RecordingErrorSink::new();
    let first = bus_with(&broker, &errors, config()).await;
    let second = bus_with(&broker, &errors, config()).await;

    let (a, a_seen) = Collect::<NewCargoBooked>::new();
    let (b, b_seen) = Collect::<NewCargoBooked>::new();
    first.subscribe::<NewCargoBooked, _>(a).await.unwrap();
    second.subscribe::<NewCargoBooked, _>(b).await.unwrap();
    first.start().await.unwrap();
    second.start().await.unwrap();

    for i in 0..20 {
        first
            .publish(&fixtures::new_cargo_booked(&format!("C{i:03}"), "SESTO", "USNYC"))
            .await
            .unwrap();
    }

    assert!(eventually(|| a_seen.lock().unwrap().len() + b_seen.lock().unwrap().len() == 20).await);
    let mut ids: Vec<String> = a_seen
        .lock()
        .unwrap()
        .iter()
        .chain(b_seen.lock().unwrap().iter())
        .map(|e| e.tracking_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20, "each message handled exactly once");

    first.close().await.unwrap();
    second.close().await.unwrap();
}
