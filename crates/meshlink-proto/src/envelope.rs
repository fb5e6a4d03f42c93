//! The `{topic, payload}` envelope.
//!
//! Used uniformly for pub/sub messages and for RPC requests and replies (where
//! the topic is the device uuid).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// Single data-channel frame carrying a topic and a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic (pub/sub) or destination uuid (RPC).
    pub topic: String,
    /// Message body.
    pub payload: Payload,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self { topic: topic.into(), payload }
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON wire form.
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Envelope payload: a plain string or a structured JSON value.
///
/// Outbound payloads are validated through [`Payload::try_from`]; inbound
/// payloads are accepted as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Plain string payload.
    Text(String),
    /// Structured payload (object or array when produced locally).
    Structured(Value),
}

impl Payload {
    /// Build a structured payload from a JSON object.
    pub fn object(map: Map<String, Value>) -> Self {
        Self::Structured(Value::Object(map))
    }

    /// The payload as a JSON object, if it is one.
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Structured(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// The payload as text, if it is a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Self::Text(text) => Value::String(text),
            Self::Structured(value) => value,
        }
    }
}

impl TryFrom<Value> for Payload {
    type Error = ProtoError;

    /// Accepts strings, objects and arrays. Numbers, booleans and null are
    /// rejected.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Object(_) | Value::Array(_) => Ok(Self::Structured(value)),
            other => Err(ProtoError::InvalidPayload { kind: ProtoError::kind_of(&other) }),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self::object(map)
    }
}
