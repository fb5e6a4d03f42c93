//! Device profile handshake.
//!
//! After a device connection opens, the client sends
//! [`ControlFrame::ProfileRequest`]. The device answers with a control-prefixed
//! JSON object:
//!
//! ```text
//! SSG:{"type":"response","target":"profile","method":"get",
//!      "body":{"uuid":"...","name":"...","peerId":"...", ...}}
//! ```

use serde_json::{Map, Value, json};

use crate::{control::ControlFrame, error::ProtoError};

/// Metadata a device reports about itself.
///
/// The profile is opaque apart from `uuid`, which is required and identifies
/// the device across reconnects. All fields are kept exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    uuid: String,
    fields: Map<String, Value>,
}

impl DeviceProfile {
    /// Build a profile from the handshake `body` object.
    pub fn from_body(body: Value) -> Result<Self, ProtoError> {
        let Value::Object(fields) = body else {
            return Err(ProtoError::InvalidField {
                field: "body",
                reason: format!("expected object, got {}", ProtoError::kind_of(&body)),
            });
        };

        let uuid = match fields.get("uuid") {
            Some(Value::String(uuid)) if !uuid.is_empty() => uuid.clone(),
            Some(_) => {
                return Err(ProtoError::InvalidField {
                    field: "uuid",
                    reason: "expected non-empty string".to_string(),
                });
            },
            None => return Err(ProtoError::MissingField { field: "uuid" }),
        };

        Ok(Self { uuid, fields })
    }

    /// Extract a profile from a decoded control JSON object.
    ///
    /// Returns `Ok(None)` when the object is not a profile `get` response.
    pub fn from_response(value: &Value) -> Result<Option<Self>, ProtoError> {
        let is_profile_response = value.get("type").and_then(Value::as_str) == Some("response")
            && value.get("target").and_then(Value::as_str) == Some("profile")
            && value.get("method").and_then(Value::as_str) == Some("get");

        if !is_profile_response {
            return Ok(None);
        }

        let body = value.get("body").cloned().ok_or(ProtoError::MissingField { field: "body" })?;
        Self::from_body(body).map(Some)
    }

    /// Encode the handshake response a device sends for this profile.
    pub fn to_response_frame(&self) -> ControlFrame {
        ControlFrame::Json(json!({
            "type": "response",
            "target": "profile",
            "method": "get",
            "body": Value::Object(self.fields.clone()),
        }))
    }

    /// Stable application id.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Display name, if reported.
    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }

    /// Transport peer id the device reports for itself.
    pub fn peer_id(&self) -> Option<&str> {
        self.fields.get("peerId").and_then(Value::as_str)
    }

    /// Whether the device can stream media.
    pub fn streaming(&self) -> bool {
        self.fields.get("streaming").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Topics the device advertises.
    pub fn topics(&self) -> Vec<&str> {
        self.fields
            .get("topics")
            .and_then(Value::as_array)
            .map(|topics| topics.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Free-form description, if reported.
    pub fn description(&self) -> Option<&str> {
        self.fields.get("description").and_then(Value::as_str)
    }

    /// All profile fields as received.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The profile as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}
