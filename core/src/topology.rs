//! Broker topology: the exchange, the per-service queue and consumer QoS.
//!
//! ```text
//!                       ┌──────────────────────┐
//!   publish(key) ─────► │ exchange "shipping"  │ (durable, direct)
//!                       └──────────┬───────────┘
//!                 binding per      │ exact routing-key match
//!                 subscribed kind  ▼
//!        ┌──────────────────┐  ┌──────────────────┐
//!        │ booking.queue    │  │ tracking.queue   │ (durable, shared by
//!        └──────────────────┘  └──────────────────┘  every instance)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the exchange every service publishes to.
pub const DEFAULT_EXCHANGE: &str = "shipping";

/// Suffix appended to a service name to build its queue name.
pub const QUEUE_SUFFIX: &str = ".queue";

/// Exchange routing algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Exact routing-key match
    Direct,
    /// Copy to every bound queue
    Fanout,
    /// Pattern match on dot-separated keys
    Topic,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Fanout => f.write_str("fanout"),
            Self::Topic => f.write_str("topic"),
        }
    }
}

/// Attributes of an exchange declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDeclaration {
    /// Exchange name
    pub name: String,
    /// Routing algorithm
    pub kind: ExchangeKind,
    /// Survives broker restarts
    pub durable: bool,
    /// Deleted when the last queue unbinds
    pub auto_delete: bool,
}

impl ExchangeDeclaration {
    /// A durable direct exchange.
    #[must_use]
    pub fn durable_direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
            durable: true,
            auto_delete: false,
        }
    }
}

/// Attributes of a queue declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDeclaration {
    /// Queue name
    pub name: String,
    /// Survives broker restarts
    pub durable: bool,
    /// Restricted to the declaring connection
    pub exclusive: bool,
    /// Deleted when the last consumer goes away
    pub auto_delete: bool,
}

impl QueueDeclaration {
    /// A durable, shareable queue.
    ///
    /// Several process instances of the same service consume from it, which is
    /// how a service scales horizontally.
    #[must_use]
    pub fn durable_shared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Consumer quality-of-service (prefetch) settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    /// Maximum unacknowledged deliveries held by the session
    pub prefetch_count: u16,
    /// Maximum unacknowledged bytes (0 = unlimited)
    pub prefetch_size: u32,
    /// Apply to the whole connection instead of the session
    pub global: bool,
}

impl Qos {
    /// Per-session prefetch limit with no byte limit.
    #[must_use]
    pub const fn prefetch(count: u16) -> Self {
        Self {
            prefetch_count: count,
            prefetch_size: 0,
            global: false,
        }
    }
}

impl Default for Qos {
    fn default() -> Self {
        Self::prefetch(1)
    }
}

/// Everything a service declares before it starts consuming.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// The shared exchange
    pub exchange: ExchangeDeclaration,
    /// The service's own queue
    pub queue: QueueDeclaration,
    /// Backpressure limit
    pub qos: Qos,
}

impl Topology {
    /// Topology of a service on the default `shipping` exchange.
    ///
    /// # Example
    ///
    /// ```
    /// use shipping_bus_core::topology::Topology;
    ///
    /// let topology = Topology::for_service("tracking");
    /// assert_eq!(topology.exchange.name, "shipping");
    /// assert_eq!(topology.queue.name, "tracking.queue");
    /// assert_eq!(topology.qos.prefetch_count, 1);
    /// ```
    #[must_use]
    pub fn for_service(service: &str) -> Self {
        Self {
            exchange: ExchangeDeclaration::durable_direct(DEFAULT_EXCHANGE),
            queue: QueueDeclaration::durable_shared(queue_name(service)),
            qos: Qos::default(),
        }
    }

    /// Replace the exchange name.
    #[must_use]
    pub fn with_exchange(mut self, name: impl Into<String>) -> Self {
        self.exchange.name = name.into();
        self
    }
}

/// Queue name of a service (`<service>.queue`).
#[must_use]
pub fn queue_name(service: &str) -> String {
    format!("{service}{QUEUE_SUFFIX}")
}
