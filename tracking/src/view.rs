//! Cargo read model served by the tracking views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipping_bus_core::schema::{NewCargoBooked, from_timestamp};

/// Status text of a cargo nobody has handled yet.
pub const NOT_RECEIVED: &str = "NotReceived";

/// What a customer sees when tracking a cargo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoView {
    /// Tracking identifier
    pub tracking_id: String,
    /// Transport status as shown to the customer
    pub status_text: String,
    /// Origin location code
    pub origin: String,
    /// Destination location code
    pub destination: String,
    /// Estimated time of arrival, once routed
    pub eta: Option<DateTime<Utc>>,
    /// Human-readable next step
    pub next_expected_activity: String,
    /// Latest acceptable arrival
    pub arrival_deadline: Option<DateTime<Utc>>,
    /// Handling history, oldest first
    pub events: Vec<TrackingEvent>,
}

impl CargoView {
    /// View of a cargo that was just booked.
    #[must_use]
    pub fn booked(event: &NewCargoBooked) -> Self {
        Self {
            tracking_id: event.tracking_id.clone(),
            status_text: NOT_RECEIVED.to_string(),
            origin: event.origin.clone(),
            destination: event.destination.clone(),
            eta: None,
            next_expected_activity: String::new(),
            arrival_deadline: event.arrival_deadline.as_ref().and_then(from_timestamp),
            events: Vec::new(),
        }
    }
}

/// One line of a cargo's handling history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// What happened, where and when
    pub description: String,
    /// Whether the itinerary planned for it
    pub expected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipping_bus_core::schema::to_timestamp;

    #[test]
    fn booked_view_starts_unreceived_without_history() {
        let deadline = Utc::now();
        let event = NewCargoBooked {
            tracking_id: "ABC123".to_string(),
            origin: "SESTO".to_string(),
            destination: "USNYC".to_string(),
            arrival_deadline: Some(to_timestamp(deadline)),
            delivery: None,
        };

        let view = CargoView::booked(&event);

        assert_eq!(view.tracking_id, "ABC123");
        assert_eq!(view.status_text, NOT_RECEIVED);
        assert_eq!(view.arrival_deadline, Some(deadline));
        assert!(view.eta.is_none());
        assert!(view.events.is_empty());
    }
}
