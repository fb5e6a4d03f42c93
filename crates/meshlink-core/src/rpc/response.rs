//! Settled RPC responses.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RpcError;

/// Reply to one fetch.
///
/// For chunked replies the body is the reassembled string.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: Option<u16>,
    transaction_id: u64,
    method: Option<String>,
    body: Value,
}

impl Response {
    /// Build a response.
    pub fn new(status: Option<u16>, transaction_id: u64, method: Option<String>, body: Value) -> Self {
        Self { status, transaction_id, method, body }
    }

    /// Status code, if the device sent one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Correlation id; equals the id of the request.
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// Method echoed by the device.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Raw body as received.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Body as text: strings as-is, `null` as empty, anything else as JSON.
    pub fn text(&self) -> String {
        match &self.body {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Body decoded as `T`.
    ///
    /// String bodies (including reassembled chunked bodies) are parsed as
    /// JSON text; structured bodies are converted directly.
    ///
    /// # Errors
    ///
    /// - `RpcError::BodyDecode` if the body does not decode as `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        let decoded = match &self.body {
            Value::String(text) => serde_json::from_str(text),
            other => T::deserialize(other),
        };

        decoded.map_err(|err| RpcError::BodyDecode { reason: err.to_string() })
    }

    /// Whether the status is absent or in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_none_or(|status| (200..300).contains(&status))
    }
}
