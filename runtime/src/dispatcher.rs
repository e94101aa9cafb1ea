//! Consumer loop.
//!
//! One dispatcher task per bus owns the delivery stream. Each delivery is
//! resolved before the next one is pulled:
//!
//! ```text
//! delivery ─► registry lookup ─┬─ none ──────────────► nack(requeue)
//!                              └─ handler ─► decode ─┬─ ok ─► handle ─┬─ ok ──► ack
//!                                                    │                └─ err ─► nack(requeue) + report
//!                                                    └─ err ─────────────────► nack(requeue) + report
//! ```
//!
//! The loop ends when the stop signal is raised or the stream closes. It never
//! reconnects; that belongs to whatever re-establishes the session and then
//! calls `EventBus::restore_topology`.

use crate::metrics::{DeliveryOutcome, EventBusMetrics};
use crate::registry::{DispatchError, HandlerRegistry};
use futures::StreamExt;
use shipping_bus_core::broker::{BrokerError, Delivery, DeliveryStream};
use shipping_bus_core::event_bus::{BusState, ErrorSink, EventBusError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::Instrument;

/// Owns the delivery stream and drives handlers.
pub(crate) struct Dispatcher {
    pub(crate) deliveries: DeliveryStream,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) error_sink: Arc<dyn ErrorSink>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) state: Arc<watch::Sender<BusState>>,
    pub(crate) requeue_delay: Duration,
}

impl Dispatcher {
    /// Run until stopped or until the stream ends.
    pub(crate) async fn run(mut self) {
        tracing::info!("Dispatcher started");

        while !*self.shutdown.borrow() {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }

                next = self.deliveries.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            let span = tracing::debug_span!(
                                "delivery",
                                kind = %delivery.event_kind(),
                                delivery_tag = delivery.delivery_tag(),
                                redelivered = delivery.redelivered(),
                            );
                            self.process(delivery).instrument(span).await;
                        }
                        Some(Err(error)) => {
                            EventBusMetrics::record_transport_error();
                            self.error_sink.report(EventBusError::TransportError(error));
                        }
                        None => {
                            self.stream_ended();
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    async fn process(&mut self, delivery: Delivery) {
        let kind = delivery.event_kind().to_string();
        let delivery_tag = delivery.delivery_tag();

        let Some(handler) = self.registry.get(&kind) else {
            tracing::debug!("No handler registered, returning delivery to the queue");
            EventBusMetrics::record_delivery(&kind, DeliveryOutcome::Unroutable);
            self.pause_before_requeue().await;
            let result = delivery.nack(true).await;
            self.settle(result);
            return;
        };

        let started = Instant::now();
        let outcome = handler.dispatch(delivery.body()).await;
        EventBusMetrics::record_handler(&kind, started.elapsed());

        match outcome {
            Ok(()) => {
                let result = delivery.ack().await;
                EventBusMetrics::record_delivery(&kind, DeliveryOutcome::Ack);
                tracing::debug!("Delivery acknowledged");
                self.settle(result);
            }
            Err(failure) => {
                self.pause_before_requeue().await;
                let result = delivery.nack(true).await;
                EventBusMetrics::record_delivery(&kind, DeliveryOutcome::Nack);
                self.settle(result);

                let error = match failure {
                    DispatchError::Decode(source) => EventBusError::DecodeFailed {
                        delivery_tag,
                        source,
                    },
                    DispatchError::Handler(source) => EventBusError::HandlerFailed {
                        routing_key: handler.routing_key(),
                        delivery_tag,
                        source,
                    },
                };
                self.error_sink.report(error);
            }
        }
    }

    /// Route an ack/nack failure. While stopping, the session is closed under
    /// the dispatcher on purpose and the broker requeues the delivery itself.
    fn settle(&self, result: Result<(), BrokerError>) {
        let Err(error) = result else {
            return;
        };
        if *self.shutdown.borrow() {
            tracing::debug!(error = %error, "Acknowledgement dropped during shutdown");
        } else {
            self.error_sink
                .report(EventBusError::AcknowledgementFailed(error));
        }
    }

    /// Give other tasks a turn before a delivery goes back to the queue.
    ///
    /// A requeued message comes straight back. Without a yield an unroutable
    /// or failing one holds the runtime and `subscribe` callers never run.
    async fn pause_before_requeue(&mut self) {
        if *self.shutdown.borrow() {
            return;
        }
        if self.requeue_delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(self.requeue_delay) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    fn stream_ended(&self) {
        let was_consuming = self.state.send_if_modified(|state| {
            if *state == BusState::Consuming {
                *state = BusState::Idle;
                true
            } else {
                false
            }
        });
        if was_consuming {
            tracing::warn!("Delivery stream ended; bus is idle until restarted");
        }
    }
}

