//! Client error types.

use meshlink_core::{BootstrapError, ClientState, RpcError, StreamingError};
use meshlink_proto::CallId;
use thiserror::Error;

/// Errors from client operations.
///
/// Validation errors are returned synchronously by the operation. Deferred
/// operations (fetch, streaming) that fail later are settled with one of
/// these through [`crate::Completion`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Publish topic was empty or contained a wildcard.
    #[error("invalid topic: {topic:?}")]
    InvalidTopic {
        /// The rejected topic.
        topic: String,
    },

    /// Publish payload was neither a string nor a structured object.
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        /// Why the payload was rejected.
        reason: String,
    },

    /// Fetch target was not of the form `<uuid>/<path>`.
    #[error("invalid path: {path:?}")]
    InvalidPath {
        /// The rejected target.
        path: String,
    },

    /// No device connection is registered for this uuid.
    #[error("no connection for device {uuid}")]
    NoConnection {
        /// The device uuid.
        uuid: String,
    },

    /// The counterpart event did not arrive in time.
    #[error("{operation} timed out")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
    },

    /// Operation requires a started client.
    #[error("client not started (state: {state})")]
    NotStarted {
        /// Current client state.
        state: ClientState,
    },

    /// A streaming request for this device is already in flight.
    #[error("streaming request already in progress for {uuid}")]
    StreamingInProgress {
        /// The device uuid.
        uuid: String,
    },

    /// The device already streams on a recorded call.
    #[error("device {uuid} is already streaming on {call_id}")]
    AlreadyStreaming {
        /// The device uuid.
        uuid: String,
        /// The recorded call.
        call_id: CallId,
    },

    /// Stop requested while no call is recorded.
    #[error("device {uuid} is not streaming")]
    NotStreaming {
        /// The device uuid.
        uuid: String,
    },

    /// A media call failed or closed before it was established.
    #[error("call {call_id} failed: {reason}")]
    CallFailed {
        /// The failed call.
        call_id: CallId,
        /// Transport-provided description.
        reason: String,
    },

    /// Bootstrap failed; startup is rejected.
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// Request could not be encoded.
    #[error("encode error: {reason}")]
    Encode {
        /// Encoder failure description.
        reason: String,
    },

    /// Response body did not decode as requested.
    #[error("body decode error: {reason}")]
    BodyDecode {
        /// Decoder failure description.
        reason: String,
    },
}

impl ClientError {
    /// Returns true if the error is a timeout, including a bootstrap phase
    /// timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Bootstrap(BootstrapError::Timeout { .. }))
    }

    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Validation failures are permanent; connectivity and timing failures
    /// are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            // Transient: connectivity and timing
            Self::NoConnection { .. }
            | Self::Timeout { .. }
            | Self::NotStarted { .. }
            | Self::StreamingInProgress { .. }
            | Self::CallFailed { .. } => true,

            // Permanent: the call itself is wrong, or startup failed
            Self::InvalidTopic { .. }
            | Self::InvalidPayload { .. }
            | Self::InvalidPath { .. }
            | Self::AlreadyStreaming { .. }
            | Self::NotStreaming { .. }
            | Self::Bootstrap(_)
            | Self::Encode { .. }
            | Self::BodyDecode { .. } => false,
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::InvalidPath { path } => Self::InvalidPath { path },
            RpcError::Encode { reason } => Self::Encode { reason },
            RpcError::BodyDecode { reason } => Self::BodyDecode { reason },
        }
    }
}

impl From<StreamingError> for ClientError {
    fn from(err: StreamingError) -> Self {
        match err {
            StreamingError::NoConnection { uuid } => Self::NoConnection { uuid },
            StreamingError::InProgress { uuid } => Self::StreamingInProgress { uuid },
            StreamingError::AlreadyStreaming { uuid, call_id } => {
                Self::AlreadyStreaming { uuid, call_id }
            },
            StreamingError::NotStreaming { uuid } => Self::NotStreaming { uuid },
            StreamingError::CallFailed { call_id, reason } => Self::CallFailed { call_id, reason },
            StreamingError::Timeout { operation } => Self::Timeout { operation },
        }
    }
}

#[cfg(test)]
mod tests {
    use meshlink_core::BootstrapPhase;

    use super::*;

    #[test]
    fn timeout_is_transient() {
        let err = ClientError::Timeout { operation: "fetch" };
        assert!(err.is_timeout());
        assert!(err.is_transient());
    }

    #[test]
    fn validation_is_permanent() {
        let err = ClientError::InvalidPath { path: "abc".to_string() };
        assert!(!err.is_transient());
    }

    #[test]
    fn streaming_errors_map_onto_client_errors() {
        let err: ClientError = StreamingError::InProgress { uuid: "abc".to_string() }.into();
        assert_eq!(err, ClientError::StreamingInProgress { uuid: "abc".to_string() });

        let err: ClientError = StreamingError::Timeout { operation: "sendStream" }.into();
        assert!(err.is_timeout());
    }

    #[test]
    fn error_display() {
        let err = ClientError::NoConnection { uuid: "missing".to_string() };
        assert_eq!(err.to_string(), "no connection for device missing");

        let err = ClientError::Bootstrap(BootstrapError::Timeout { phase: BootstrapPhase::RoomJoin });
        assert!(err.is_timeout());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "bootstrap failed: bootstrap timed out waiting for room join");

        let err = ClientError::NotStarted { state: ClientState::RoomJoined };
        assert_eq!(err.to_string(), "client not started (state: room joined)");
    }
}
