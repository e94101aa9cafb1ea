//! Event handler contract.
//!
//! A handler reacts to one event kind. Each service supplies its own handlers
//! (the tracking service's read-model updaters, the booking service's
//! cargo-handled handler); the bus only decodes, invokes and acknowledges.

use crate::event::IntegrationEvent;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Outcome of a failed handler invocation.
///
/// Any failure makes the bus return the message to the queue, so handlers do
/// not need to classify errors as transient or permanent.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The event refers to an entity the service does not know (yet)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The event violates a business rule
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The backing store failed
    #[error("Repository error: {0}")]
    Repository(String),

    /// Any other failure
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Reacts to one kind of integration event.
///
/// Invocations are serialized by the dispatcher: a handler never runs
/// concurrently with another handler of the same bus, so read models updated
/// from handlers need no extra synchronization against each other.
///
/// # Example
///
/// ```
/// use shipping_bus_core::handler::{EventHandler, HandlerError};
/// use shipping_bus_core::schema::NewCargoBooked;
///
/// struct LogBooking;
///
/// impl EventHandler<NewCargoBooked> for LogBooking {
///     async fn handle(&self, event: NewCargoBooked) -> Result<(), HandlerError> {
///         println!("booked {}", event.tracking_id);
///         Ok(())
///     }
/// }
/// ```
pub trait EventHandler<E: IntegrationEvent>: Send + Sync + 'static {
    /// Handle one decoded event.
    ///
    /// # Errors
    ///
    /// Returning an error negatively acknowledges the delivery with requeue and
    /// reports the error to the bus's error sink.
    fn handle(&self, event: E) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

impl<E, H> EventHandler<E> for Arc<H>
where
    E: IntegrationEvent,
    H: EventHandler<E>,
{
    fn handle(&self, event: E) -> impl Future<Output = Result<(), HandlerError>> + Send {
        (**self).handle(event)
    }
}
