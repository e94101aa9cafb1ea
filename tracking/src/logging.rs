//! Handler decorator that logs every invocation.

use shipping_bus_core::event::IntegrationEvent;
use shipping_bus_core::handler::{EventHandler, HandlerError};
use std::time::Instant;

/// Wraps a handler and logs the event, the time it took and any error.
///
/// # Example
///
/// ```ignore
/// bus.subscribe::<NewCargoBooked, _>(LoggingEventHandler::new(NewCargoBookedHandler::new(cargos)))
///     .await?;
/// ```
#[derive(Clone, Debug)]
pub struct LoggingEventHandler<H> {
    inner: H,
}

impl<H> LoggingEventHandler<H> {
    /// Decorate `inner`.
    pub const fn new(inner: H) -> Self {
        Self { inner }
    }

    /// The decorated handler.
    pub const fn inner(&self) -> &H {
        &self.inner
    }
}

impl<E, H> EventHandler<E> for LoggingEventHandler<H>
where
    E: IntegrationEvent,
    H: EventHandler<E>,
{
    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        let rendered = format!("{event:?}");
        let started = Instant::now();
        let result = self.inner.handle(event).await;
        let took = started.elapsed();

        match &result {
            Ok(()) => tracing::info!(
                event_kind = E::KIND,
                event = %rendered,
                took_ms = took.as_millis(),
                "Event handled"
            ),
            Err(error) => tracing::warn!(
                event_kind = E::KIND,
                event = %rendered,
                took_ms = took.as_millis(),
                error = %error,
                "Event handling failed"
            ),
        }
        result
    }
}
