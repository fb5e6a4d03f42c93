//! Client events and actions.
//!
//! The client consumes [`ClientEvent`]s and produces [`ClientAction`]s. The
//! caller (runtime or simulation) executes the actions and feeds every
//! resulting transport notification back as a new event.

use std::time::Instant;

use meshlink_core::{ClientState, FetchOptions, OperationId, Response, StreamingOutcome};
use meshlink_proto::{
    CallId, CallOptions, DeviceProfile, FrameData, Payload, RoomEvent, RoomRequest, StreamHandle,
};
use serde_json::Value;

use crate::error::ClientError;

/// Input to the client state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Begin the bootstrap sequence.
    Start,

    /// The transport assigned our peer id.
    TransportReady {
        /// Our peer id.
        peer_id: String,
    },

    /// Room-level signaling arrived.
    Room(RoomEvent),

    /// A data connection opened.
    ConnectionOpened {
        /// Remote peer.
        peer_id: String,
    },

    /// A data frame arrived.
    DataReceived {
        /// Remote peer.
        peer_id: String,
        /// Frame contents.
        data: FrameData,
    },

    /// A data connection closed.
    ConnectionClosed {
        /// Remote peer.
        peer_id: String,
    },

    /// A data connection reported an error.
    ConnectionError {
        /// Remote peer.
        peer_id: String,
        /// Transport-provided description.
        reason: String,
    },

    /// A peer is calling us.
    IncomingCall {
        /// Transport-assigned call id.
        call_id: CallId,
        /// Caller.
        peer_id: String,
    },

    /// A call produced a media stream.
    CallStream {
        /// The call.
        call_id: CallId,
    },

    /// A call failed.
    CallError {
        /// The call.
        call_id: CallId,
        /// Transport-provided description.
        reason: String,
    },

    /// A call closed.
    CallClosed {
        /// The call.
        call_id: CallId,
    },

    /// Time advanced. Expires every deadline `<= now` and sends due
    /// keepalives.
    Tick {
        /// Current time.
        now: Instant,
    },

    /// Publish to every registered device.
    Publish {
        /// Concrete topic.
        topic: String,
        /// String or structured payload.
        payload: Value,
    },

    /// Add a subscription filter.
    Subscribe {
        /// Filter, may contain wildcards.
        topic: String,
    },

    /// Remove a subscription filter.
    Unsubscribe {
        /// Filter to remove.
        topic: String,
    },

    /// Issue an RPC request.
    Fetch {
        /// Operation to settle.
        op: OperationId,
        /// `<uuid>/<path>`.
        target: String,
        /// Method, query, body, timeout.
        options: FetchOptions,
    },

    /// Ask a device to stream to us.
    RequestStreaming {
        /// Operation to settle.
        op: OperationId,
        /// Device uuid.
        uuid: String,
    },

    /// Stop a device's stream.
    StopStreaming {
        /// Operation to settle.
        op: OperationId,
        /// Device uuid.
        uuid: String,
    },

    /// Stream local media to a device.
    SendStream {
        /// Operation to settle.
        op: OperationId,
        /// Device uuid.
        uuid: String,
        /// Local stream.
        stream: StreamHandle,
        /// Call options.
        options: CallOptions,
    },
}

/// Output of the client state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    /// Open a data connection.
    Connect {
        /// Peer to connect to.
        peer_id: String,
    },

    /// Send a text frame on a data connection.
    Send {
        /// Connection to send on.
        peer_id: String,
        /// Encoded frame.
        frame: String,
    },

    /// Send room-level signaling.
    Room(RoomRequest),

    /// Accept an inbound call.
    AnswerCall {
        /// The call.
        call_id: CallId,
    },

    /// Close a call.
    CloseCall {
        /// The call.
        call_id: CallId,
    },

    /// Originate a call carrying a local stream.
    PlaceCall {
        /// Id chosen for the call.
        call_id: CallId,
        /// Peer to call.
        peer_id: String,
        /// Local stream.
        stream: StreamHandle,
        /// Call options.
        options: CallOptions,
    },

    /// Settle a deferred operation.
    Complete {
        /// The operation.
        op: OperationId,
        /// Its result.
        completion: Completion,
    },

    /// Tell the application something happened.
    Notify(Notification),
}

/// Result of a deferred operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// A fetch settled.
    Fetch(Result<Response, ClientError>),
    /// A streaming operation settled.
    Streaming(Result<StreamingOutcome, ClientError>),
}

impl Completion {
    /// Error carried by the completion, if it failed.
    pub fn error(&self) -> Option<&ClientError> {
        match self {
            Self::Fetch(Err(err)) | Self::Streaming(Err(err)) => Some(err),
            Self::Fetch(Ok(_)) | Self::Streaming(Ok(_)) => None,
        }
    }
}

/// Lifecycle and data notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The client state advanced.
    StateChanged {
        /// New state.
        state: ClientState,
    },

    /// Bootstrap completed.
    Connected {
        /// Our peer id.
        peer_id: String,
    },

    /// Bootstrap failed.
    StartFailed {
        /// Why.
        error: ClientError,
    },

    /// A device completed its profile handshake.
    DeviceConnected {
        /// Device uuid.
        uuid: String,
        /// Full profile as received.
        profile: DeviceProfile,
    },

    /// A device went away.
    DeviceDisconnected {
        /// Device uuid.
        uuid: String,
    },

    /// A message matched a subscription.
    Message {
        /// Message topic.
        topic: String,
        /// Message payload.
        payload: Payload,
    },

    /// An inbound call did not belong to any pending request.
    UnclaimedCall {
        /// The call.
        call_id: CallId,
        /// Caller.
        peer_id: String,
    },

    /// A device's stream closed without a stop request.
    StreamClosed {
        /// Device uuid.
        uuid: String,
        /// The call.
        call_id: CallId,
    },

    /// A device's stream failed.
    StreamError {
        /// Device uuid.
        uuid: String,
        /// The call.
        call_id: CallId,
        /// Transport-provided description.
        reason: String,
    },

    /// A data connection reported an error.
    TransportError {
        /// Remote peer.
        peer_id: String,
        /// Transport-provided description.
        reason: String,
    },
}
