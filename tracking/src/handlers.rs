//! Handlers that keep the cargo read model in step with booking and handling.
//!
//! | Event | Effect on the view |
//! |---|---|
//! | `NewCargoBooked` | stores a new view |
//! | `CargoDestinationChanged` | replaces the destination |
//! | `CargoToRouteAssigned` | replaces the ETA |
//! | `CargoWasHandled` | replaces status, next activity and ETA, appends to the history |
//!
//! Every handler except the booking one fails with [`HandlerError::NotFound`]
//! for a cargo it has no view of. The bus requeues the message, so an update
//! that overtakes its booking is applied once the booking has been stored.

use crate::repository::CargoViewRepository;
use crate::view::{CargoView, TrackingEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use shipping_bus_core::environment::Clock;
use shipping_bus_core::handler::{EventHandler, HandlerError};
use shipping_bus_core::schema::{
    CargoDestinationChanged, CargoToRouteAssigned, CargoWasHandled, HandlingActivity,
    HandlingEvent, HandlingEventType, NewCargoBooked, TransportStatus, from_timestamp,
};
use std::sync::Arc;

/// Stores the view of a newly booked cargo.
#[derive(Clone)]
pub struct NewCargoBookedHandler<R> {
    cargos: R,
}

impl<R: CargoViewRepository> NewCargoBookedHandler<R> {
    /// Create a handler writing to `cargos`.
    pub const fn new(cargos: R) -> Self {
        Self { cargos }
    }
}

impl<R: CargoViewRepository> EventHandler<NewCargoBooked> for NewCargoBookedHandler<R> {
    async fn handle(&self, event: NewCargoBooked) -> Result<(), HandlerError> {
        tracing::debug!(
            tracking_id = %event.tracking_id,
            origin = %event.origin,
            destination = %event.destination,
            "New cargo booked"
        );
        self.cargos.store(CargoView::booked(&event)).await?;
        Ok(())
    }
}

/// Points a cargo's view at its new destination.
#[derive(Clone)]
pub struct CargoDestinationChangedHandler<R> {
    cargos: R,
}

impl<R: CargoViewRepository> CargoDestinationChangedHandler<R> {
    /// Create a handler writing to `cargos`.
    pub const fn new(cargos: R) -> Self {
        Self { cargos }
    }
}

impl<R: CargoViewRepository> EventHandler<CargoDestinationChanged>
    for CargoDestinationChangedHandler<R>
{
    async fn handle(&self, event: CargoDestinationChanged) -> Result<(), HandlerError> {
        let mut view = self.cargos.find(&event.tracking_id).await?;
        tracing::debug!(
            tracking_id = %event.tracking_id,
            from = %view.destination,
            to = %event.destination,
            "Cargo destination changed"
        );
        view.destination = event.destination;
        self.cargos.store(view).await?;
        Ok(())
    }
}

/// Records the ETA of a cargo that was routed.
#[derive(Clone)]
pub struct CargoToRouteAssignedHandler<R> {
    cargos: R,
}

impl<R: CargoViewRepository> CargoToRouteAssignedHandler<R> {
    /// Create a handler writing to `cargos`.
    pub const fn new(cargos: R) -> Self {
        Self { cargos }
    }
}

impl<R: CargoViewRepository> EventHandler<CargoToRouteAssigned> for CargoToRouteAssignedHandler<R> {
    async fn handle(&self, event: CargoToRouteAssigned) -> Result<(), HandlerError> {
        let mut view = self.cargos.find(&event.tracking_id).await?;
        view.eta = event.eta.as_ref().and_then(from_timestamp);
        tracing::debug!(
            tracking_id = %event.tracking_id,
            eta = ?view.eta,
            "Cargo assigned to route"
        );
        self.cargos.store(view).await?;
        Ok(())
    }
}

/// Applies a handling report to a cargo's view.
#[derive(Clone)]
pub struct CargoWasHandledHandler<R> {
    cargos: R,
    clock: Arc<dyn Clock>,
}

impl<R: CargoViewRepository> CargoWasHandledHandler<R> {
    /// Create a handler writing to `cargos`, stamping history entries with `clock`.
    pub fn new(cargos: R, clock: Arc<dyn Clock>) -> Self {
        Self { cargos, clock }
    }
}

impl<R: CargoViewRepository> EventHandler<CargoWasHandled> for CargoWasHandledHandler<R> {
    async fn handle(&self, event: CargoWasHandled) -> Result<(), HandlerError> {
        let mut view = self.cargos.find(&event.tracking_id).await?;
        let delivery = event.delivery.unwrap_or_default();

        view.status_text = TransportStatus::try_from(delivery.transport_status)
            .unwrap_or(TransportStatus::Unknown)
            .as_str()
            .to_string();
        view.next_expected_activity =
            next_expected_activity(delivery.next_expected_activity.as_ref());
        view.eta = delivery.eta.as_ref().and_then(from_timestamp);
        if let Some(last) = &delivery.last_event {
            view.events.push(TrackingEvent {
                description: describe(last, self.clock.now()),
                expected: delivery.is_last_event_expected,
            });
        }

        tracing::debug!(
            tracking_id = %event.tracking_id,
            status = %view.status_text,
            history = view.events.len(),
            "Cargo was handled"
        );
        self.cargos.store(view).await?;
        Ok(())
    }
}

fn activity_kind(activity: &HandlingActivity) -> Option<HandlingEventType> {
    HandlingEventType::try_from(activity.activity_type).ok()
}

/// Sentence describing what should happen to the cargo next.
#[must_use]
pub fn next_expected_activity(activity: Option<&HandlingActivity>) -> String {
    const PREFIX: &str = "Next expected activity is to";

    let Some(activity) = activity else {
        return "There are currently no expected activities for this shipping.".to_string();
    };
    match activity_kind(activity) {
        Some(HandlingEventType::NotHandled) => {
            "There are currently no expected activities for this shipping.".to_string()
        }
        Some(kind @ HandlingEventType::Load) => format!(
            "{PREFIX} {} cargo onto voyage {} in {}.",
            kind.verb(),
            activity.voyage_number,
            activity.location
        ),
        Some(kind @ HandlingEventType::Unload) => format!(
            "{PREFIX} {} cargo off of voyage {} in {}.",
            kind.verb(),
            activity.voyage_number,
            activity.location
        ),
        Some(kind) => format!("{PREFIX} {} cargo in {}.", kind.verb(), activity.location),
        None => format!("{PREFIX} handle cargo in {}.", activity.location),
    }
}

/// History line for a handling event observed at `at`.
#[must_use]
pub fn describe(event: &HandlingEvent, at: DateTime<Utc>) -> String {
    let Some(activity) = &event.activity else {
        return "[Unknown status]".to_string();
    };
    let at = at.to_rfc3339_opts(SecondsFormat::Secs, true);
    let location = &activity.location;
    let voyage = &activity.voyage_number;

    match activity_kind(activity) {
        Some(HandlingEventType::NotHandled) => "Cargo has not yet been received.".to_string(),
        Some(HandlingEventType::Receive) => format!("Received in {location}, at {at}."),
        Some(HandlingEventType::Load) => {
            format!("Loaded onto voyage {voyage} in {location}, at {at}.")
        }
        Some(HandlingEventType::Unload) => {
            format!("Unloaded off voyage {voyage} in {location}, at {at}.")
        }
        Some(HandlingEventType::Claim) => format!("Claimed in {location}, at {at}."),
        Some(HandlingEventType::Customs) => format!("Cleared customs in {location}, at {at}."),
        None => "[Unknown status]".to_string(),
    }
}
