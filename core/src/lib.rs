//! # Shipping Bus Core
//!
//! Core traits and types for the shipping platform's event bus.
//!
//! The booking, handling and tracking services exchange integration events over
//! a persistent message broker. This crate defines what those services agree
//! on, independent of the broker client:
//!
//! - **Wire codec**: Protocol Buffers schemas and routing keys ([`event`], [`schema`])
//! - **Broker session**: declarations, publish, delivery stream and acknowledgement ([`broker`])
//! - **Topology**: the `shipping` exchange and per-service queues ([`topology`])
//! - **Handlers**: the per-kind reaction contract ([`handler`])
//! - **Bus errors and lifecycle states** ([`event_bus`])
//!
//! ## Example
//!
//! ```ignore
//! use shipping_bus_core::handler::{EventHandler, HandlerError};
//! use shipping_bus_core::schema::NewCargoBooked;
//!
//! struct StoreBooking { cargos: CargoViews }
//!
//! impl EventHandler<NewCargoBooked> for StoreBooking {
//!     async fn handle(&self, event: NewCargoBooked) -> Result<(), HandlerError> {
//!         self.cargos.store(event.into())
//!     }
//! }
//!
//! bus.subscribe::<NewCargoBooked, _>(StoreBooking { cargos }).await?;
//! ```

pub use chrono::{DateTime, Utc};

pub mod broker;
pub mod event;
pub mod event_bus;
pub mod handler;
pub mod schema;
pub mod topology;

pub use broker::{BrokerError, BrokerSession, Delivery, DeliveryStream, OutboundMessage};
pub use event::{CodecError, IntegrationEvent, RoutingKey};
pub use event_bus::{BusState, ErrorSink, EventBusError, LoggingErrorSink};
pub use handler::{EventHandler, HandlerError};
pub use topology::Topology;

/// Environment module - injected dependencies
///
/// All external dependencies that handlers need beyond their repositories are
/// abstracted behind traits so tests can substitute deterministic versions.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use shipping_bus_core::environment::{Clock, SystemClock};
    ///
    /// let before = chrono::Utc::now();
    /// assert!(SystemClock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
