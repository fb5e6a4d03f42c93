//! Control frames.
//!
//! Control frames are plain strings rather than JSON envelopes. They always
//! start with [`CONTROL_PREFIX`] and carry handshake, keepalive and streaming
//! signaling. A control frame whose body is a JSON object (the profile
//! handshake response) is decoded as [`ControlFrame::Json`].

use serde_json::Value;

use crate::error::ProtoError;

/// Literal prefix of every control frame.
pub const CONTROL_PREFIX: &str = "SSG:";

/// Peer id prefix identifying devices in a mesh room.
pub const DEVICE_PREFIX: &str = "SSG_";

const PROFILE_GET: &str = "profile/get";
const KEEPALIVE: &str = "keepalive";
const STREAM_START: &str = "stream/start";
const STREAM_STOP: &str = "stream/stop";

/// A decoded control frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    /// Ask the peer for its device profile.
    ProfileRequest,

    /// Liveness signal, sent periodically on every open device connection.
    Keepalive {
        /// Peer id of the sender.
        peer_id: String,
    },

    /// Ask the device to call the sender back with its media stream.
    StreamStart {
        /// Peer id the device should call.
        peer_id: String,
    },

    /// Ask the device to stop streaming.
    StreamStop,

    /// Control-prefixed JSON object (e.g. the profile handshake response).
    Json(Value),

    /// Any other control command. Passed through untouched.
    Other(String),
}

impl ControlFrame {
    /// Whether `text` is a control frame.
    pub fn is_control(text: &str) -> bool {
        text.starts_with(CONTROL_PREFIX)
    }

    /// Encode to the on-wire string.
    pub fn encode(&self) -> String {
        match self {
            Self::ProfileRequest => format!("{CONTROL_PREFIX}{PROFILE_GET}"),
            Self::Keepalive { peer_id } => format!("{CONTROL_PREFIX}{KEEPALIVE},{peer_id}"),
            Self::StreamStart { peer_id } => format!("{CONTROL_PREFIX}{STREAM_START},{peer_id}"),
            Self::StreamStop => format!("{CONTROL_PREFIX}{STREAM_STOP}"),
            Self::Json(value) => format!("{CONTROL_PREFIX}{value}"),
            Self::Other(command) => format!("{CONTROL_PREFIX}{command}"),
        }
    }

    /// Decode a control frame.
    ///
    /// Returns `Ok(None)` if `text` does not carry the control prefix. A
    /// prefixed body that starts like a JSON object but fails to parse is an
    /// error; anything else unknown becomes [`ControlFrame::Other`].
    pub fn decode(text: &str) -> Result<Option<Self>, ProtoError> {
        let Some(body) = text.strip_prefix(CONTROL_PREFIX) else {
            return Ok(None);
        };

        if body.trim_start().starts_with('{') {
            let value: Value = serde_json::from_str(body)?;
            return Ok(Some(Self::Json(value)));
        }

        let frame = match body {
            PROFILE_GET => Self::ProfileRequest,
            STREAM_STOP => Self::StreamStop,
            _ => match body.split_once(',') {
                Some((KEEPALIVE, peer_id)) => Self::Keepalive { peer_id: peer_id.to_string() },
                Some((STREAM_START, peer_id)) => {
                    Self::StreamStart { peer_id: peer_id.to_string() }
                },
                _ => Self::Other(body.to_string()),
            },
        };

        Ok(Some(frame))
    }
}
