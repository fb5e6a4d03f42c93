//! Protocol decode and validation errors.

use thiserror::Error;

/// Errors produced while encoding, decoding or validating wire types.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Frame body was not valid JSON, or did not match the expected shape.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload was neither a string nor a structured object.
    #[error("payload must be a string or a structured object, got {kind}")]
    InvalidPayload {
        /// JSON kind that was rejected.
        kind: &'static str,
    },

    /// Binary frame did not contain UTF-8 text.
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    /// A required field was absent.
    #[error("missing field: {field}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field was present but unusable.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ProtoError {
    /// Human-readable JSON kind, used in [`ProtoError::InvalidPayload`].
    pub(crate) fn kind_of(value: &serde_json::Value) -> &'static str {
        match value {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        }
    }
}
