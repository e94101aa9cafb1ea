//! Event bus configuration.
//!
//! # Example
//!
//! ```
//! use shipping_bus_runtime::config::BusConfig;
//! use std::time::Duration;
//!
//! let config = BusConfig::builder("tracking")
//!     .drain_timeout(Duration::from_secs(10))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.topology().queue.name, "tracking.queue");
//! ```
//!
//! # Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `SERVICE_NAME` | required |
//! | `EVENT_BUS_EXCHANGE` | `shipping` |
//! | `EVENT_BUS_CONSUMER_TAG` | `<service>.consumer` |
//! | `EVENT_BUS_DRAIN_TIMEOUT_MS` | `5000` |
//! | `EVENT_BUS_REQUEUE_DELAY_MS` | `0` |

use serde::{Deserialize, Serialize};
use shipping_bus_core::topology::{DEFAULT_EXCHANGE, Topology};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    /// A value could not be parsed
    #[error("Invalid value for {key}: {value}")]
    ParseError {
        /// Variable or field name
        key: String,
        /// Offending value
        value: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Settings for one event bus instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Service name; the queue is `<service>.queue`
    pub service: String,
    /// Exchange every service publishes to
    pub exchange: String,
    /// Consumer tag; derived from the service name when absent
    pub consumer_tag: Option<String>,
    /// How long `close()` waits for the dispatcher to finish the current handler
    pub drain_timeout: Duration,
    /// Pause before a failed delivery is returned to the queue
    pub requeue_delay: Duration,
}

impl BusConfig {
    /// Default drain timeout
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Start building a configuration for `service`.
    #[must_use]
    pub fn builder(service: impl Into<String>) -> BusConfigBuilder {
        BusConfigBuilder {
            config: Self {
                service: service.into(),
                exchange: DEFAULT_EXCHANGE.to_string(),
                consumer_tag: None,
                drain_timeout: Self::DEFAULT_DRAIN_TIMEOUT,
                requeue_delay: Duration::ZERO,
            },
        }
    }

    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `SERVICE_NAME` is missing, a value does not
    /// parse, or the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, file, test map).
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let service = lookup("SERVICE_NAME")
            .ok_or_else(|| ConfigError::EnvVarNotSet("SERVICE_NAME".to_string()))?;
        let mut builder = Self::builder(service);

        if let Some(exchange) = lookup("EVENT_BUS_EXCHANGE") {
            builder = builder.exchange(exchange);
        }
        if let Some(tag) = lookup("EVENT_BUS_CONSUMER_TAG") {
            builder = builder.consumer_tag(tag);
        }
        if let Some(ms) = parse_opt::<u64>(&lookup, "EVENT_BUS_DRAIN_TIMEOUT_MS")? {
            builder = builder.drain_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_opt::<u64>(&lookup, "EVENT_BUS_REQUEUE_DELAY_MS")? {
            builder = builder.requeue_delay(Duration::from_millis(ms));
        }

        builder.build()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.is_empty() {
            return Err(ConfigError::ValidationError("service cannot be empty".to_string()));
        }
        if self.service.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(
                "service cannot contain whitespace".to_string(),
            ));
        }
        if self.exchange.is_empty() {
            return Err(ConfigError::ValidationError("exchange cannot be empty".to_string()));
        }
        if self.drain_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "drain_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Consumer tag sent to the broker.
    #[must_use]
    pub fn consumer_tag(&self) -> String {
        self.consumer_tag
            .clone()
            .unwrap_or_else(|| format!("{}.consumer", self.service))
    }

    /// Exchange, queue and QoS this configuration describes.
    ///
    /// The prefetch limit is always 1: handlers of one bus never overlap.
    #[must_use]
    pub fn topology(&self) -> Topology {
        Topology::for_service(&self.service).with_exchange(self.exchange.clone())
    }
}

fn parse_opt<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::ParseError {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

/// Builder for [`BusConfig`].
#[derive(Debug, Clone)]
pub struct BusConfigBuilder {
    config: BusConfig,
}

impl BusConfigBuilder {
    /// Exchange name (default `shipping`).
    #[must_use]
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.config.exchange = exchange.into();
        self
    }

    /// Consumer tag.
    #[must_use]
    pub fn consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.config.consumer_tag = Some(tag.into());
        self
    }

    /// Drain timeout used by `close()`.
    #[must_use]
    pub const fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Delay before a failed delivery is requeued.
    #[must_use]
    pub const fn requeue_delay(mut self, delay: Duration) -> Self {
        self.config.requeue_delay = delay;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the configuration is invalid.
    pub fn build(self) -> Result<BusConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_shared_topology() {
        let config = BusConfig::builder("booking").build().unwrap();
        assert_eq!(config.exchange, "shipping");
        assert_eq!(config.requeue_delay, Duration::ZERO);
        assert_eq!(config.consumer_tag(), "booking.consumer");

        let topology = config.topology();
        assert_eq!(topology.queue.name, "booking.queue");
        assert_eq!(topology.qos.prefetch_count, 1);
    }

    #[test]
    fn from_lookup_reads_overrides() {
        let config = BusConfig::from_lookup(lookup(&[
            ("SERVICE_NAME", "tracking"),
            ("EVENT_BUS_CONSUMER_TAG", "tracking-1"),
            ("EVENT_BUS_DRAIN_TIMEOUT_MS", "250"),
            ("EVENT_BUS_REQUEUE_DELAY_MS", " 100 "),
        ]))
        .unwrap();

        assert_eq!(config.service, "tracking");
        assert_eq!(config.consumer_tag(), "tracking-1");
        assert_eq!(config.drain_timeout, Duration::from_millis(250));
        assert_eq!(config.requeue_delay, Duration::from_millis(100));
    }

    #[test]
    fn missing_service_name_is_reported() {
        let err = BusConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::EnvVarNotSet("SERVICE_NAME".to_string()));
    }

    #[test]
    fn unparsable_number_is_reported() {
        let err = BusConfig::from_lookup(lookup(&[
            ("SERVICE_NAME", "tracking"),
            ("EVENT_BUS_DRAIN_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ParseError { key, .. } if key == "EVENT_BUS_DRAIN_TIMEOUT_MS"
        ));
    }

    #[test]
    fn prefetch_is_not_configurable() {
        let config = BusConfig::from_lookup(lookup(&[
            ("SERVICE_NAME", "tracking"),
            ("EVENT_BUS_PREFETCH", "8"),
        ]))
        .unwrap();

        assert_eq!(config.topology().qos.prefetch_count, 1);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(BusConfig::builder("").build().is_err());
        assert!(BusConfig::builder("my service").build().is_err());
        assert!(BusConfig::builder("tracking").exchange("").build().is_err());
        assert!(
            BusConfig::builder("tracking")
                .drain_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }
}
