//! # Shipping Tracking
//!
//! The consume side of the tracking service: a cargo read model kept in step
//! with booking and handling events.
//!
//! - **Read model**: [`CargoView`] and its history ([`view`])
//! - **Storage**: [`CargoViewRepository`] with an in-memory default ([`repository`])
//! - **Handlers**: one per subscribed event kind ([`handlers`])
//! - **Logging decorator**: [`LoggingEventHandler`] ([`logging`])
//! - **Configuration**: [`TrackingConfig`] ([`config`])
//!
//! ## Example
//!
//! ```ignore
//! let cargos = InMemoryCargoViewRepository::new();
//! shipping_tracking::subscribe_all(&bus, cargos.clone(), Arc::new(SystemClock)).await?;
//! bus.start().await?;
//! ```

pub mod config;
pub mod handlers;
pub mod logging;
pub mod repository;
pub mod view;

pub use config::TrackingConfig;
pub use logging::LoggingEventHandler;
pub use repository::{CargoViewRepository, InMemoryCargoViewRepository, RepositoryError};
pub use view::{CargoView, TrackingEvent};

use handlers::{
    CargoDestinationChangedHandler, CargoToRouteAssignedHandler, CargoWasHandledHandler,
    NewCargoBookedHandler,
};
use shipping_bus_core::environment::Clock;
use shipping_bus_core::event_bus::EventBusError;
use shipping_bus_core::schema::{
    CargoDestinationChanged, CargoToRouteAssigned, CargoWasHandled, NewCargoBooked,
};
use shipping_bus_runtime::EventBus;
use std::sync::Arc;

/// Subscribe the four read-model handlers, each wrapped in a [`LoggingEventHandler`].
///
/// # Errors
///
/// Returns the first [`EventBusError`] from [`EventBus::subscribe`].
pub async fn subscribe_all<R>(
    bus: &EventBus,
    cargos: R,
    clock: Arc<dyn Clock>,
) -> Result<(), EventBusError>
where
    R: CargoViewRepository + Clone,
{
    bus.subscribe::<NewCargoBooked, _>(LoggingEventHandler::new(NewCargoBookedHandler::new(
        cargos.clone(),
    )))
    .await?;
    bus.subscribe::<CargoDestinationChanged, _>(LoggingEventHandler::new(
        CargoDestinationChangedHandler::new(cargos.clone()),
    ))
    .await?;
    bus.subscribe::<CargoToRouteAssigned, _>(LoggingEventHandler::new(
        CargoToRouteAssignedHandler::new(cargos.clone()),
    ))
    .await?;
    bus.subscribe::<CargoWasHandled, _>(LoggingEventHandler::new(CargoWasHandledHandler::new(
        cargos, clock,
    )))
    .await?;
    Ok(())
}
