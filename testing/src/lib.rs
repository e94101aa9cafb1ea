//! # Shipping Bus Testing
//!
//! Test doubles for code built on the shipping event bus.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a broker with AMQP queue semantics that runs in process
//! - [`RecordingErrorSink`]: captures errors the dispatcher reports
//! - [`FixedClock`]: deterministic time
//! - [`fixtures`]: ready-made integration events
//! - [`properties`]: proptest strategies for tracking ids, locations and events
//!
//! ## Example
//!
//! ```ignore
//! use shipping_bus_testing::{InMemoryBroker, RecordingErrorSink};
//!
//! #[tokio::test]
//! async fn booking_reaches_tracking() {
//!     let broker = InMemoryBroker::new();
//!     let errors = RecordingErrorSink::new();
//!     let bus = EventBus::builder(Arc::new(broker.session()), config)
//!         .error_sink(errors.clone())
//!         .build()
//!         .await?;
//!
//!     bus.subscribe::<NewCargoBooked, _>(handler).await?;
//!     bus.start().await?;
//!     bus.publish(&fixtures::new_cargo_booked("ABC123", "SESTO", "USNYC")).await?;
//! }
//! ```

use chrono::{DateTime, Utc};
use shipping_bus_core::environment::Clock;

pub mod broker;
pub mod sink;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use shipping_bus_testing::mocks::FixedClock;
    /// use shipping_bus_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Integration events with plausible content.
pub mod fixtures {
    use shipping_bus_core::schema::{
        CargoDestinationChanged, CargoToRouteAssigned, CargoWasHandled, Delivery, HandlingActivity,
        HandlingEvent, HandlingEventType, Itinerary, Leg, NewCargoBooked, TransportStatus,
        to_timestamp,
    };
    use shipping_bus_core::{DateTime, Utc};

    /// A freshly booked cargo, not yet received.
    #[must_use]
    pub fn new_cargo_booked(tracking_id: &str, origin: &str, destination: &str) -> NewCargoBooked {
        NewCargoBooked {
            tracking_id: tracking_id.to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            arrival_deadline: None,
            delivery: Some(Delivery {
                transport_status: TransportStatus::NotReceived as i32,
                next_expected_activity: Some(activity(HandlingEventType::Receive, origin, "")),
                ..Delivery::default()
            }),
        }
    }

    /// A destination change.
    #[must_use]
    pub fn cargo_destination_changed(
        tracking_id: &str,
        destination: &str,
    ) -> CargoDestinationChanged {
        CargoDestinationChanged {
            tracking_id: tracking_id.to_string(),
            destination: destination.to_string(),
        }
    }

    /// A single-leg route assignment arriving at `eta`.
    #[must_use]
    pub fn cargo_to_route_assigned(
        tracking_id: &str,
        voyage: &str,
        from: &str,
        to: &str,
        eta: DateTime<Utc>,
    ) -> CargoToRouteAssigned {
        CargoToRouteAssigned {
            tracking_id: tracking_id.to_string(),
            eta: Some(to_timestamp(eta)),
            itinerary: Some(Itinerary {
                legs: vec![Leg {
                    voyage_number: voyage.to_string(),
                    load_location: from.to_string(),
                    unload_location: to.to_string(),
                    load_time: None,
                    unload_time: Some(to_timestamp(eta)),
                }],
            }),
            delivery: Some(Delivery {
                transport_status: TransportStatus::NotReceived as i32,
                next_expected_activity: Some(activity(HandlingEventType::Receive, from, "")),
                eta: Some(to_timestamp(eta)),
                ..Delivery::default()
            }),
        }
    }

    /// A handled cargo whose delivery reflects `status` and the next expected step.
    ///
    /// The last event is the activity that typically produces `status`: a load
    /// for cargo on board, an unload for cargo in port.
    #[must_use]
    pub fn cargo_was_handled(
        tracking_id: &str,
        status: TransportStatus,
        location: &str,
        voyage: &str,
        next: Option<HandlingActivity>,
    ) -> CargoWasHandled {
        let last = match status {
            TransportStatus::OnboardCarrier => HandlingEventType::Load,
            TransportStatus::InPort => HandlingEventType::Unload,
            TransportStatus::Claimed => HandlingEventType::Claim,
            TransportStatus::NotReceived | TransportStatus::Unknown => {
                HandlingEventType::NotHandled
            }
        };
        CargoWasHandled {
            tracking_id: tracking_id.to_string(),
            delivery: Some(Delivery {
                transport_status: status as i32,
                next_expected_activity: next,
                last_event: Some(HandlingEvent {
                    tracking_id: tracking_id.to_string(),
                    activity: Some(activity(last, location, voyage)),
                }),
                last_known_location: location.to_string(),
                current_voyage: voyage.to_string(),
                ..Delivery::default()
            }),
        }
    }

    /// A handling activity.
    #[must_use]
    pub fn activity(kind: HandlingEventType, location: &str, voyage: &str) -> HandlingActivity {
        HandlingActivity {
            activity_type: kind as i32,
            location: location.to_string(),
            voyage_number: voyage.to_string(),
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Route `tracing` output through the test harness, filtered by `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs a subscriber.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use shipping_bus_core::schema::{CargoDestinationChanged, NewCargoBooked};

    /// Tracking ids shaped like the booking service's (`ABC123`).
    pub fn tracking_id() -> impl Strategy<Value = String> {
        "[A-Z]{3}[0-9]{3}"
    }

    /// UN/LOCODE-shaped location codes (`SESTO`).
    pub fn location() -> impl Strategy<Value = String> {
        "[A-Z]{5}"
    }

    /// Bookings with distinct origin and destination.
    pub fn new_cargo_booked() -> impl Strategy<Value = NewCargoBooked> {
        (tracking_id(), location(), location())
            .prop_filter("origin and destination differ", |(_, o, d)| o != d)
            .prop_map(|(id, origin, destination)| {
                super::fixtures::new_cargo_booked(&id, &origin, &destination)
            })
    }

    /// Destination changes.
    pub fn cargo_destination_changed() -> impl Strategy<Value = CargoDestinationChanged> {
        (tracking_id(), location()).prop_map(|(id, destination)| {
            super::fixtures::cargo_destination_changed(&id, &destination)
        })
    }
}

pub use broker::{InMemoryBroker, InMemorySession};
pub use mocks::{FixedClock, test_clock};
pub use sink::RecordingErrorSink;
