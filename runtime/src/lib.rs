//! # Shipping Bus Runtime
//!
//! The event bus every shipping service embeds.
//!
//! ## Core Components
//!
//! - **Topology bootstrap**: declares the exchange and service queue, sets prefetch ([`bootstrap`])
//! - **Publisher**: encodes events and publishes them under their kind ([`publisher`])
//! - **Handler registry**: event kind to handler, owned by one bus ([`registry`])
//! - **Dispatcher**: the consumer loop that decodes, invokes and acknowledges
//! - **Lifecycle**: [`EventBus`] with `start`, `close` and `restore_topology`
//!
//! ## Example
//!
//! ```ignore
//! use shipping_bus_runtime::{BusConfig, EventBus};
//!
//! let config = BusConfig::from_env()?;
//! let bus = EventBus::builder(session, config).build().await?;
//!
//! bus.subscribe::<CargoWasHandled, _>(UpdateDelivery::new(cargos)).await?;
//! bus.start().await?;
//!
//! bus.publish(&NewCargoBooked { tracking_id: "ABC123".into(), ..Default::default() }).await?;
//! ```

pub mod bootstrap;
pub mod bus;
pub mod config;
mod dispatcher;
pub mod metrics;
pub mod publisher;
pub mod registry;

pub use bus::{EventBus, EventBusBuilder};
pub use config::{BusConfig, ConfigError};
pub use publisher::Publisher;
pub use registry::HandlerRegistry;
