//! Error sink that keeps what it is given.

use shipping_bus_core::event_bus::{ErrorSink, EventBusError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Recorded {
    errors: Mutex<Vec<EventBusError>>,
    reported: Notify,
}

/// Records every reported error. Clones share the same record.
///
/// # Example
///
/// ```
/// use shipping_bus_core::event_bus::{ErrorSink, EventBusError};
/// use shipping_bus_testing::RecordingErrorSink;
///
/// let sink = RecordingErrorSink::new();
/// sink.clone().report(EventBusError::Closed);
/// assert_eq!(sink.messages(), vec!["Event bus closed"]);
/// ```
#[derive(Clone, Default)]
pub struct RecordingErrorSink {
    inner: Arc<Recorded>,
}

impl RecordingErrorSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn errors(&self) -> MutexGuard<'_, Vec<EventBusError>> {
        self.inner
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of errors reported so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors().len()
    }

    /// Whether nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Display form of every reported error, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors().iter().map(ToString::to_string).collect()
    }

    /// Remove and return everything reported so far.
    #[must_use]
    pub fn take(&self) -> Vec<EventBusError> {
        std::mem::take(&mut *self.errors())
    }

    /// Wait until at least `count` errors were reported.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let reported = self.inner.reported.notified();
                tokio::pin!(reported);
                reported.as_mut().enable();
                if self.len() >= count {
                    return;
                }
                reported.await;
            }
        })
        .await
        .is_ok()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, error: EventBusError) {
        tracing::debug!(error = %error, "Recorded event bus error");
        self.errors().push(error);
        self.inner.reported.notify_waiters();
    }
}
