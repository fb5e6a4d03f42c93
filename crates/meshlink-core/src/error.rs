//! Core error types.

use meshlink_proto::CallId;
use thiserror::Error;

use crate::bootstrap::BootstrapPhase;

/// Errors from the RPC correlator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Target was not of the form `<uuid>/<path>`.
    #[error("invalid request path: {path:?}")]
    InvalidPath {
        /// The rejected target string.
        path: String,
    },

    /// Request could not be encoded.
    #[error("failed to encode request: {reason}")]
    Encode {
        /// Encoder failure description.
        reason: String,
    },

    /// Response body could not be decoded as requested.
    #[error("failed to decode response body: {reason}")]
    BodyDecode {
        /// Decoder failure description.
        reason: String,
    },
}

/// Errors from chunk reassembly. The offending fragment is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// Fragment declared zero total chunks.
    #[error("chunked reply for transaction {transaction_id} declares zero chunks")]
    Empty {
        /// Transaction the fragment belongs to.
        transaction_id: u64,
    },

    /// Fragment index does not fit the assembly.
    #[error("chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange {
        /// Fragment index.
        index: usize,
        /// Slots in the assembly.
        total: usize,
    },

    /// Fragment disagrees with the assembly about the number of chunks.
    #[error("chunk count mismatch: assembly has {expected}, fragment says {actual}")]
    LengthMismatch {
        /// Slots in the assembly.
        expected: usize,
        /// `chunk_len` carried by the fragment.
        actual: usize,
    },
}

/// Errors from the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A profile arrived on a connection with no handshake in progress.
    #[error("unexpected profile from {peer_id}")]
    UnexpectedProfile {
        /// Connection the profile arrived on.
        peer_id: String,
    },

    /// No device is registered under this uuid.
    #[error("unknown device: {uuid}")]
    UnknownDevice {
        /// The uuid that was looked up.
        uuid: String,
    },
}

/// Errors from streaming control.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamingError {
    /// No data connection for this uuid.
    #[error("no connection for device {uuid}")]
    NoConnection {
        /// The device uuid.
        uuid: String,
    },

    /// A streaming exchange for this device is already in flight.
    #[error("streaming request already in progress for {uuid}")]
    InProgress {
        /// The device uuid.
        uuid: String,
    },

    /// The device already has an active media session.
    #[error("device {uuid} is already streaming on {call_id}")]
    AlreadyStreaming {
        /// The device uuid.
        uuid: String,
        /// The active call.
        call_id: CallId,
    },

    /// Stop requested while no call is recorded.
    #[error("device {uuid} is not streaming")]
    NotStreaming {
        /// The device uuid.
        uuid: String,
    },

    /// The call failed or closed before it was established.
    #[error("call {call_id} failed: {reason}")]
    CallFailed {
        /// The failed call.
        call_id: CallId,
        /// Transport-provided description.
        reason: String,
    },

    /// The counterpart event did not arrive in time.
    #[error("{operation} timed out")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
    },
}

/// Errors from the bootstrap sequence. Any of them aborts startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    /// `start` was called more than once.
    #[error("bootstrap already started")]
    AlreadyStarted,

    /// A phase's counterpart event did not arrive in time.
    #[error("bootstrap timed out waiting for {phase}")]
    Timeout {
        /// Phase that was waiting.
        phase: BootstrapPhase,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BootstrapError::Timeout { phase: BootstrapPhase::MemberList };
        assert_eq!(err.to_string(), "bootstrap timed out waiting for member list");

        let err = AssemblyError::IndexOutOfRange { index: 3, total: 3 };
        assert_eq!(err.to_string(), "chunk index 3 out of range for 3 chunks");

        let err = StreamingError::Timeout { operation: "requestStreaming" };
        assert_eq!(err.to_string(), "requestStreaming timed out");
    }
}
