//! Wire envelope exchanged with peers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;

/// Inbound request to move the sending connection to another room.
pub const EVENT_CHANGE_ROOM: &str = "change_room";
/// Acknowledgement sent back after a room change.
pub const EVENT_SET_ROOM: &str = "set_room";

/// A single event on the wire: `{"type": ..., "payload": ..., "from": ...}`.
///
/// The payload is carried through untouched. `from` is empty for events the
/// server originates unless a handler sets it. A missing or `null` `type`
/// decodes as empty and is left for routing to reject.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Routing discriminator.
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub event_type: String,
    /// Opaque application payload (`null` when absent).
    #[serde(default)]
    pub payload: Value,
    /// Sender identity as claimed by the peer.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub from: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Event {
    /// Build an event with an empty `from`.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            from: String::new(),
        }
    }

    /// Set the sender identity.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Decode an inbound frame body.
    ///
    /// Only non-JSON input or wrongly typed fields fail. A bare `null`
    /// decodes as an empty event.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let event: Option<Self> = serde_json::from_slice(bytes)?;
        Ok(event.unwrap_or_default())
    }

    /// Encode for a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Payload as plain text.
    ///
    /// A JSON string contributes its contents, anything else its JSON text.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
