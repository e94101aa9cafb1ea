//! Prometheus metrics for the event bus.
//!
//! The dispatcher and publisher always record through the `metrics` facade; the
//! values go nowhere until a recorder is installed. Services that want a scrape
//! endpoint start a [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use shipping_bus_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be configured.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), the listener is not
    /// started and a warning is logged instead.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }
        register_metrics();

        let addr = self.addr;
        tokio::spawn(async move {
            // The exporter's error type carries no printable detail.
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "event_bus_deliveries_total",
        "Deliveries resolved by the dispatcher, by outcome (ack, nack, unroutable)"
    );
    describe_histogram!(
        "event_bus_handler_duration_seconds",
        "Time spent inside event handlers"
    );
    describe_counter!(
        "event_bus_messages_published_total",
        "Total number of messages published to the exchange"
    );
    describe_counter!(
        "event_bus_publish_errors_total",
        "Total number of publish errors"
    );
    describe_counter!(
        "event_bus_transport_errors_total",
        "Errors reported by the delivery stream"
    );
}

/// How the dispatcher resolved a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handler succeeded, delivery acknowledged
    Ack,
    /// Decode or handler failure, delivery requeued
    Nack,
    /// No handler registered, delivery requeued
    Unroutable,
}

impl DeliveryOutcome {
    /// Label value used on `event_bus_deliveries_total`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nack => "nack",
            Self::Unroutable => "unroutable",
        }
    }
}

/// Event bus metrics recorder.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a resolved delivery.
    pub fn record_delivery(kind: &str, outcome: DeliveryOutcome) {
        counter!(
            "event_bus_deliveries_total",
            "kind" => kind.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    /// Record time spent in a handler.
    pub fn record_handler(kind: &str, duration: Duration) {
        histogram!("event_bus_handler_duration_seconds", "kind" => kind.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a message publish.
    pub fn record_publish(kind: &str) {
        counter!("event_bus_messages_published_total", "kind" => kind.to_string()).increment(1);
    }

    /// Record a publish error.
    pub fn record_publish_error(kind: &str) {
        counter!("event_bus_publish_errors_total", "kind" => kind.to_string()).increment(1);
    }

    /// Record an error from the delivery stream.
    pub fn record_transport_error() {
        counter!("event_bus_transport_errors_total").increment(1);
    }
}
