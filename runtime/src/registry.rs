//! Handler registry: event kind → type-erased handler.
//!
//! The registry is owned by one bus instance and shared with its dispatcher.
//! Subscriptions write under a short exclusive lock; the dispatcher reads under a
//! shared lock, clones the handler out and releases the lock before invoking it,
//! so a slow handler never blocks a concurrent subscribe.

use shipping_bus_core::event::{CodecError, IntegrationEvent, RoutingKey, decode};
use shipping_bus_core::handler::{EventHandler, HandlerError};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

/// Why a dispatched delivery was not handled.
#[derive(Debug)]
pub enum DispatchError {
    /// The payload did not decode as the registered kind
    Decode(CodecError),
    /// The handler returned an error
    Handler(HandlerError),
}

/// Boxed future returned by [`ErasedHandler::dispatch`].
pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

/// A handler with its event type erased: takes raw bytes, decodes, invokes.
pub trait ErasedHandler: Send + Sync {
    /// Event kind this handler is registered for.
    fn routing_key(&self) -> RoutingKey;

    /// Decode `body` and run the handler on it.
    fn dispatch<'a>(&'a self, body: &'a [u8]) -> DispatchFuture<'a>;
}

/// Binds a typed [`EventHandler`] to the codec of its event kind.
struct TypedHandler<E, H> {
    handler: H,
    _event: PhantomData<fn() -> E>,
}

impl<E, H> ErasedHandler for TypedHandler<E, H>
where
    E: IntegrationEvent,
    H: EventHandler<E>,
{
    fn routing_key(&self) -> RoutingKey {
        RoutingKey::of::<E>()
    }

    fn dispatch<'a>(&'a self, body: &'a [u8]) -> DispatchFuture<'a> {
        Box::pin(async move {
            let event = decode::<E>(body).map_err(DispatchError::Decode)?;
            self.handler
                .handle(event)
                .await
                .map_err(DispatchError::Handler)
        })
    }
}

/// Concurrency-safe map from event kind to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<RoutingKey, Arc<dyn ErasedHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for event kind `E`.
    ///
    /// A previous handler for the same kind is replaced (last write wins).
    /// Returns `true` if a handler was replaced.
    pub fn insert<E, H>(&self, handler: H) -> bool
    where
        E: IntegrationEvent,
        H: EventHandler<E>,
    {
        let erased: Arc<dyn ErasedHandler> = Arc::new(TypedHandler {
            handler,
            _event: PhantomData::<fn() -> E>,
        });
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(RoutingKey::of::<E>(), erased)
            .is_some()
    }

    /// Look up the handler for an event kind.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    /// Whether a handler is registered for an event kind.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    /// Every registered event kind, sorted.
    ///
    /// These are exactly the bindings the service's queue needs.
    #[must_use]
    pub fn routing_keys(&self) -> Vec<RoutingKey> {
        let mut keys: Vec<RoutingKey> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
