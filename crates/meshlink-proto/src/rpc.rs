//! RPC request and reply payloads.
//!
//! Requests and replies travel inside an [`Envelope`] whose topic is the
//! device uuid. Replies come in two shapes:
//!
//! ```text
//! non-chunked: { status, transaction_id, method, body }
//! chunked:     { status, transaction_id, method, chunked: true, chunk_len, idx, chunk }
//! ```
//!
//! A reply too large for one data-channel message is split by the device into
//! `chunk_len` fragments, indexed `0..chunk_len`, delivered in any order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    envelope::{Envelope, Payload},
    error::ProtoError,
};

/// Request payload sent to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Method, e.g. `GET` or `PUT`.
    pub method: String,
    /// Request path, always starting with `/`.
    pub path: String,
    /// Query parameters.
    #[serde(default)]
    pub query: Map<String, Value>,
    /// Request body (string, object or null).
    #[serde(default)]
    pub body: Value,
    /// Correlation id echoed by the reply.
    pub transaction_id: u64,
}

impl RpcRequest {
    /// Wrap into an envelope addressed to `uuid`.
    pub fn into_envelope(self, uuid: &str) -> Result<Envelope, ProtoError> {
        let payload = serde_json::to_value(self)?;
        Ok(Envelope::new(uuid, Payload::Structured(payload)))
    }

    /// Parse a request out of an envelope payload.
    pub fn from_payload(payload: &Payload) -> Result<Self, ProtoError> {
        match payload {
            Payload::Structured(value) => Ok(Self::deserialize(value)?),
            Payload::Text(_) => Err(ProtoError::InvalidPayload { kind: "string" }),
        }
    }
}

/// One fragment of a chunked reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFragment {
    /// Status of the overall reply.
    pub status: Option<u16>,
    /// Correlation id.
    pub transaction_id: u64,
    /// Method echoed from the request.
    pub method: Option<String>,
    /// Total number of fragments (`chunk_len`).
    pub total: usize,
    /// Index of this fragment (`idx`).
    pub index: usize,
    /// Fragment contents.
    pub chunk: String,
}

/// Reply payload received from a device.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply {
    /// Whole reply in one frame.
    Complete {
        /// Status code.
        status: Option<u16>,
        /// Correlation id.
        transaction_id: u64,
        /// Method echoed from the request.
        method: Option<String>,
        /// Reply body.
        body: Value,
    },
    /// One fragment of a chunked reply.
    Chunk(ChunkFragment),
}

/// Flat wire form covering both reply shapes.
#[derive(Debug, Serialize, Deserialize)]
struct ReplyWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    transaction_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    chunked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    idx: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk: Option<Value>,
}

impl RpcReply {
    /// Correlation id of the reply.
    pub fn transaction_id(&self) -> u64 {
        match self {
            Self::Complete { transaction_id, .. } => *transaction_id,
            Self::Chunk(fragment) => fragment.transaction_id,
        }
    }

    /// Whether `payload` looks like an RPC reply (carries a `transaction_id`).
    pub fn is_reply(payload: &Payload) -> bool {
        payload.as_object().is_some_and(|map| map.contains_key("transaction_id"))
    }

    /// Parse a reply out of an envelope payload.
    pub fn from_payload(payload: &Payload) -> Result<Self, ProtoError> {
        let Payload::Structured(value) = payload else {
            return Err(ProtoError::InvalidPayload { kind: "string" });
        };
        let wire = ReplyWire::deserialize(value)?;

        if !wire.chunked {
            return Ok(Self::Complete {
                status: wire.status,
                transaction_id: wire.transaction_id,
                method: wire.method,
                body: wire.body.unwrap_or(Value::Null),
            });
        }

        let total = wire.chunk_len.ok_or(ProtoError::MissingField { field: "chunk_len" })?;
        let index = wire.idx.ok_or(ProtoError::MissingField { field: "idx" })?;
        let chunk = match wire.chunk.ok_or(ProtoError::MissingField { field: "chunk" })? {
            Value::String(text) => text,
            other => other.to_string(),
        };

        Ok(Self::Chunk(ChunkFragment {
            status: wire.status,
            transaction_id: wire.transaction_id,
            method: wire.method,
            total,
            index,
            chunk,
        }))
    }

    /// Encode into an envelope payload (the device side of the exchange).
    pub fn to_payload(&self) -> Result<Payload, ProtoError> {
        let wire = match self.clone() {
            Self::Complete { status, transaction_id, method, body } => ReplyWire {
                status,
                transaction_id,
                method,
                body: Some(body),
                chunked: false,
                chunk_len: None,
                idx: None,
                chunk: None,
            },
            Self::Chunk(fragment) => ReplyWire {
                status: fragment.status,
                transaction_id: fragment.transaction_id,
                method: fragment.method,
                body: None,
                chunked: true,
                chunk_len: Some(fragment.total),
                idx: Some(fragment.index),
                chunk: Some(Value::String(fragment.chunk)),
            },
        };

        Ok(Payload::Structured(serde_json::to_value(wire)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_wire_form() {
        let request = RpcRequest {
            method: "PUT".to_string(),
            path: "/led/on".to_string(),
            query: Map::new(),
            body: Value::Null,
            transaction_id: 1_700_000_000_000,
        };

        let envelope = request.into_envelope("abc").unwrap();
        assert_eq!(envelope.topic, "abc");
        assert_eq!(
            envelope.payload,
            Payload::Structured(json!({
                "method": "PUT",
                "path": "/led/on",
                "query": {},
                "body": null,
                "transaction_id": 1_700_000_000_000_u64,
            }))
        );
    }

    #[test]
    fn parses_single_frame_reply() {
        let payload = Payload::Structured(
            json!({"status": 200, "transaction_id": 7, "method": "PUT", "body": "OK"}),
        );

        assert!(RpcReply::is_reply(&payload));
        assert_eq!(
            RpcReply::from_payload(&payload).unwrap(),
            RpcReply::Complete {
                status: Some(200),
                transaction_id: 7,
                method: Some("PUT".to_string()),
                body: json!("OK"),
            }
        );
    }

    #[test]
    fn parses_chunk_fragment() {
        let payload = Payload::Structured(json!({
            "status": 200, "transaction_id": 9, "method": "GET",
            "chunked": true, "chunk_len": 3, "idx": 2, "chunk": "tail"
        }));

        let RpcReply::Chunk(fragment) = RpcReply::from_payload(&payload).unwrap() else {
            panic!("expected chunk");
        };
        assert_eq!(fragment.total, 3);
        assert_eq!(fragment.index, 2);
        assert_eq!(fragment.chunk, "tail");
        assert_eq!(fragment.transaction_id, 9);
    }

    #[test]
    fn chunk_without_index_is_rejected() {
        let payload = Payload::Structured(
            json!({"transaction_id": 9, "chunked": true, "chunk_len": 3, "chunk": "x"}),
        );
        assert!(matches!(
            RpcReply::from_payload(&payload),
            Err(ProtoError::MissingField { field: "idx" })
        ));
    }

    #[test]
    fn pubsub_payload_is_not_a_reply() {
        assert!(!RpcReply::is_reply(&Payload::Structured(json!({"temp": 21}))));
        assert!(!RpcReply::is_reply(&Payload::from("hello")));
    }

    #[test]
    fn chunk_payload_encodes_wire_fields() {
        let reply = RpcReply::Chunk(ChunkFragment {
            status: Some(200),
            transaction_id: 3,
            method: Some("GET".to_string()),
            total: 2,
            index: 1,
            chunk: "b".to_string(),
        });

        let payload = reply.to_payload().unwrap();
        assert_eq!(
            payload,
            Payload::Structured(json!({
                "status": 200, "transaction_id": 3, "method": "GET",
                "chunked": true, "chunk_len": 2, "idx": 1, "chunk": "b"
            }))
        );
        assert_eq!(RpcReply::from_payload(&payload).unwrap(), reply);
    }
}
