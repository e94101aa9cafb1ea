//! Wire schemas of the integration events exchanged by the shipping services.
//!
//! Field tags are part of the protocol contract: the booking, handling and
//! tracking services must agree on them. Add new fields with fresh tags; never
//! reuse or renumber an existing one.
//!
//! | Kind | Producer | Consumers |
//! |---|---|---|
//! | [`NewCargoBooked`] | booking | tracking, handling |
//! | [`CargoDestinationChanged`] | booking | tracking, handling |
//! | [`CargoToRouteAssigned`] | booking | tracking |
//! | [`CargoWasHandled`] | booking | tracking |
//! | [`HandlingEvent`] | handling | booking |

use crate::event::IntegrationEvent;
use chrono::{DateTime, Utc};
use prost_types::Timestamp;

/// Kind of handling activity performed on a cargo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HandlingEventType {
    /// No handling has happened yet
    NotHandled = 0,
    /// Loaded onto a carrier
    Load = 1,
    /// Unloaded off a carrier
    Unload = 2,
    /// Received at the origin
    Receive = 3,
    /// Claimed at the destination
    Claim = 4,
    /// Cleared customs
    Customs = 5,
}

impl HandlingEventType {
    /// Lower-case verb used in human-readable descriptions.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::NotHandled => "nothandled",
            Self::Load => "load",
            Self::Unload => "unload",
            Self::Receive => "receive",
            Self::Claim => "claim",
            Self::Customs => "customs",
        }
    }
}

/// Where a cargo currently is in its transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TransportStatus {
    /// Not yet received at the origin
    NotReceived = 0,
    /// Waiting in a port
    InPort = 1,
    /// On board a carrier
    OnboardCarrier = 2,
    /// Claimed by the consignee
    Claimed = 3,
    /// Status cannot be determined
    Unknown = 4,
}

impl TransportStatus {
    /// Status text shown by the tracking views.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotReceived => "NotReceived",
            Self::InPort => "InPort",
            Self::OnboardCarrier => "OnboardCarrier",
            Self::Claimed => "Claimed",
            Self::Unknown => "Unknown",
        }
    }
}

/// A single handling step: what happened, where, and on which voyage.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HandlingActivity {
    /// Activity performed
    #[prost(enumeration = "HandlingEventType", tag = "1")]
    pub activity_type: i32,
    /// UN/LOCODE of the location
    #[prost(string, tag = "2")]
    pub location: String,
    /// Voyage number (empty for activities not bound to a voyage)
    #[prost(string, tag = "3")]
    pub voyage_number: String,
}

/// One leg of an itinerary.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Leg {
    /// Voyage serving this leg
    #[prost(string, tag = "1")]
    pub voyage_number: String,
    /// UN/LOCODE where the cargo is loaded
    #[prost(string, tag = "2")]
    pub load_location: String,
    /// UN/LOCODE where the cargo is unloaded
    #[prost(string, tag = "3")]
    pub unload_location: String,
    /// Scheduled load time
    #[prost(message, optional, tag = "4")]
    pub load_time: Option<Timestamp>,
    /// Scheduled unload time
    #[prost(message, optional, tag = "5")]
    pub unload_time: Option<Timestamp>,
}

/// Route assigned to a cargo.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Itinerary {
    /// Legs in travel order
    #[prost(message, repeated, tag = "1")]
    pub legs: Vec<Leg>,
}

/// Delivery progress derived by the booking service.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Delivery {
    /// Current transport status
    #[prost(enumeration = "TransportStatus", tag = "1")]
    pub transport_status: i32,
    /// Activity expected to happen next
    #[prost(message, optional, tag = "2")]
    pub next_expected_activity: Option<HandlingActivity>,
    /// Most recent handling event
    #[prost(message, optional, tag = "3")]
    pub last_event: Option<HandlingEvent>,
    /// Whether the last event matched the itinerary
    #[prost(bool, tag = "4")]
    pub is_last_event_expected: bool,
    /// Last known UN/LOCODE
    #[prost(string, tag = "5")]
    pub last_known_location: String,
    /// Voyage the cargo is currently on, if any
    #[prost(string, tag = "6")]
    pub current_voyage: String,
    /// Estimated time of arrival
    #[prost(message, optional, tag = "7")]
    pub eta: Option<Timestamp>,
    /// Whether the cargo left its itinerary
    #[prost(bool, tag = "8")]
    pub is_misdirected: bool,
    /// Whether the cargo has been unloaded at its final destination
    #[prost(bool, tag = "9")]
    pub is_unloaded_at_destination: bool,
}

/// A cargo was booked.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NewCargoBooked {
    /// Tracking identifier
    #[prost(string, tag = "1")]
    pub tracking_id: String,
    /// Origin UN/LOCODE
    #[prost(string, tag = "2")]
    pub origin: String,
    /// Destination UN/LOCODE
    #[prost(string, tag = "3")]
    pub destination: String,
    /// Latest acceptable arrival
    #[prost(message, optional, tag = "4")]
    pub arrival_deadline: Option<Timestamp>,
    /// Initial delivery progress
    #[prost(message, optional, tag = "5")]
    pub delivery: Option<Delivery>,
}

impl IntegrationEvent for NewCargoBooked {
    const KIND: &'static str = "NewCargoBooked";
}

/// The destination of a cargo changed.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CargoDestinationChanged {
    /// Tracking identifier
    #[prost(string, tag = "1")]
    pub tracking_id: String,
    /// New destination UN/LOCODE
    #[prost(string, tag = "2")]
    pub destination: String,
}

impl IntegrationEvent for CargoDestinationChanged {
    const KIND: &'static str = "CargoDestinationChanged";
}

/// A cargo was assigned to a route.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CargoToRouteAssigned {
    /// Tracking identifier
    #[prost(string, tag = "1")]
    pub tracking_id: String,
    /// Estimated time of arrival on the new route
    #[prost(message, optional, tag = "2")]
    pub eta: Option<Timestamp>,
    /// The assigned route
    #[prost(message, optional, tag = "3")]
    pub itinerary: Option<Itinerary>,
    /// Delivery progress after the assignment
    #[prost(message, optional, tag = "4")]
    pub delivery: Option<Delivery>,
}

impl IntegrationEvent for CargoToRouteAssigned {
    const KIND: &'static str = "CargoToRouteAssigned";
}

/// A cargo was handled and its delivery progress re-derived.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CargoWasHandled {
    /// Tracking identifier
    #[prost(string, tag = "1")]
    pub tracking_id: String,
    /// Delivery progress after the handling
    #[prost(message, optional, tag = "2")]
    pub delivery: Option<Delivery>,
}

impl IntegrationEvent for CargoWasHandled {
    const KIND: &'static str = "CargoWasHandled";
}

/// A handling event registered by the handling service.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HandlingEvent {
    /// Tracking identifier
    #[prost(string, tag = "1")]
    pub tracking_id: String,
    /// What was done to the cargo
    #[prost(message, optional, tag = "2")]
    pub activity: Option<HandlingActivity>,
}

impl IntegrationEvent for HandlingEvent {
    const KIND: &'static str = "HandlingEvent";
}

/// Convert a UTC instant into a wire timestamp.
#[must_use]
pub fn to_timestamp(instant: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: instant.timestamp(),
        nanos: i32::try_from(instant.timestamp_subsec_nanos()).unwrap_or(0),
    }
}

/// Convert a wire timestamp into a UTC instant.
///
/// Returns `None` when the timestamp is outside the range `chrono` can represent
/// or carries an invalid nanosecond component.
#[must_use]
pub fn from_timestamp(timestamp: &Timestamp) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(timestamp.nanos).ok()?;
    DateTime::from_timestamp(timestamp.seconds, nanos)
}
