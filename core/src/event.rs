//! Integration events, routing keys and the wire codec.
//!
//! Every message that crosses a service boundary is an *integration event*: a
//! Protocol Buffers record with an explicitly declared kind. The kind doubles as
//! the AMQP routing key, so binding a queue and tagging an outgoing message use
//! the same identifier.
//!
//! # Design
//!
//! Events are encoded with `prost`. Protocol Buffers is schema-evolution tolerant,
//! which the bus relies on to survive producer/consumer skew:
//!
//! - Unknown fields in the payload are skipped on decode
//! - Missing fields decode to their default value
//! - Field tags, not names, are what travels on the wire
//!
//! # Example
//!
//! ```
//! use shipping_bus_core::event::{IntegrationEvent, RoutingKey, decode, encode};
//! use shipping_bus_core::schema::CargoDestinationChanged;
//!
//! let event = CargoDestinationChanged {
//!     tracking_id: "ABC123".to_string(),
//!     destination: "USNYC".to_string(),
//! };
//!
//! assert_eq!(RoutingKey::of::<CargoDestinationChanged>().as_str(), "CargoDestinationChanged");
//!
//! let bytes = encode(&event).unwrap();
//! let decoded: CargoDestinationChanged = decode(&bytes).unwrap();
//! assert_eq!(decoded, event);
//! ```

use std::borrow::{Borrow, Cow};
use std::fmt;
use thiserror::Error;

/// Content type attached to every published message.
pub const CONTENT_TYPE: &str = "application/x-protobuf";

/// Errors produced by the wire codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode an event into its binary form.
    #[error("Failed to encode {kind}: {reason}")]
    Encode {
        /// Event kind being encoded
        kind: &'static str,
        /// Underlying encoder message
        reason: String,
    },

    /// Failed to decode a payload into the expected event kind.
    #[error("Failed to decode {kind}: {reason}")]
    Decode {
        /// Event kind the payload was expected to hold
        kind: &'static str,
        /// Underlying decoder message
        reason: String,
    },
}

/// A message published between services.
///
/// Implementors are plain `prost` messages that declare the identifier used to
/// route them. The identifier is chosen once, at the type definition, instead of
/// being derived from the Rust type name at runtime.
///
/// # Naming Convention
///
/// Kinds are `PascalCase` nouns or past-tense phrases shared by every service
/// that speaks the protocol (`NewCargoBooked`, `HandlingEvent`). Renaming a kind
/// is a breaking change for every consumer bound to it.
pub trait IntegrationEvent: prost::Message + Default + Clone + Send + Sync + 'static {
    /// Routing key identifying this event kind on the exchange.
    const KIND: &'static str;
}

/// Exact-match routing key used for queue bindings and message tags.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(Cow<'static, str>);

impl RoutingKey {
    /// Create a routing key from a static identifier.
    #[must_use]
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    /// Create a routing key from an owned string (e.g. one read off the wire).
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(Cow::Owned(key.into()))
    }

    /// The routing key declared by an event kind.
    #[must_use]
    pub const fn of<E: IntegrationEvent>() -> Self {
        Self::from_static(E::KIND)
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RoutingKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for RoutingKey {
    fn from(key: &'static str) -> Self {
        Self::from_static(key)
    }
}

impl From<String> for RoutingKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// Encode an event into its binary payload.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the encoder rejects the message.
pub fn encode<E: IntegrationEvent>(event: &E) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(event.encoded_len());
    event.encode(&mut buf).map_err(|e| CodecError::Encode {
        kind: E::KIND,
        reason: e.to_string(),
    })?;
    Ok(buf)
}

/// Decode a binary payload into an event.
///
/// Unknown fields are discarded and absent fields take their default value, so a
/// payload produced by a newer (or older) schema revision still decodes.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the payload is not a valid encoding of `E`.
pub fn decode<E: IntegrationEvent>(body: &[u8]) -> Result<E, CodecError> {
    E::decode(body).map_err(|e| CodecError::Decode {
        kind: E::KIND,
        reason: e.to_string(),
    })
}
