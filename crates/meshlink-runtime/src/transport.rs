//! Transport provider seam.
//!
//! The runtime never touches sockets, data channels or media itself. A
//! [`Transport`] executes outbound requests; inbound notifications flow back
//! through an [`EventSink`].

use async_trait::async_trait;
use meshlink_client::ClientEvent;
use meshlink_proto::{CallId, CallOptions, FrameData, RoomEvent, RoomRequest, StreamHandle};
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure reported by a transport operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct TransportError {
    /// Transport-provided description.
    pub reason: String,
}

impl TransportError {
    /// Create an error from any description.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Point-to-point connection and signaling layer driven by the runtime.
///
/// Every method returns once the request has been handed off. Results that
/// arrive later (connection open, data, call events) are reported through
/// the [`EventSink`] the transport was built with.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a data connection to `peer_id`.
    async fn connect(&self, peer_id: &str) -> Result<(), TransportError>;

    /// Send a text frame on the data connection to `peer_id`.
    async fn send(&self, peer_id: &str, frame: &str) -> Result<(), TransportError>;

    /// Send room-level signaling.
    async fn room(&self, request: &RoomRequest) -> Result<(), TransportError>;

    /// Accept an inbound call.
    async fn answer_call(&self, call_id: CallId) -> Result<(), TransportError>;

    /// Close a call.
    async fn close_call(&self, call_id: CallId) -> Result<(), TransportError>;

    /// Originate a call to `peer_id` carrying `stream`.
    async fn place_call(
        &self,
        call_id: CallId,
        peer_id: &str,
        stream: StreamHandle,
        options: &CallOptions,
    ) -> Result<(), TransportError>;
}

/// Create a connected sink/inbox pair.
///
/// Hand the sink to the transport and the inbox to
/// [`crate::Runtime::new`].
pub fn channel() -> (EventSink, EventInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventInbox { rx })
}

/// Transport side of the notification channel.
///
/// Unbounded so a transport can report events from inside a call the runtime
/// is awaiting.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSink {
    /// Our peer id was assigned.
    pub fn transport_ready(&self, peer_id: impl Into<String>) -> bool {
        self.emit(ClientEvent::TransportReady { peer_id: peer_id.into() })
    }

    /// Room signaling arrived.
    pub fn room(&self, event: RoomEvent) -> bool {
        self.emit(ClientEvent::Room(event))
    }

    /// A data connection opened.
    pub fn connection_opened(&self, peer_id: impl Into<String>) -> bool {
        self.emit(ClientEvent::ConnectionOpened { peer_id: peer_id.into() })
    }

    /// A data frame arrived.
    pub fn data(&self, peer_id: impl Into<String>, data: impl Into<FrameData>) -> bool {
        self.emit(ClientEvent::DataReceived { peer_id: peer_id.into(), data: data.into() })
    }

    /// A data connection closed.
    pub fn connection_closed(&self, peer_id: impl Into<String>) -> bool {
        self.emit(ClientEvent::ConnectionClosed { peer_id: peer_id.into() })
    }

    /// A data connection reported an error.
    pub fn connection_error(&self, peer_id: impl Into<String>, reason: impl Into<String>) -> bool {
        self.emit(ClientEvent::ConnectionError { peer_id: peer_id.into(), reason: reason.into() })
    }

    /// A peer is calling us.
    pub fn incoming_call(&self, call_id: CallId, peer_id: impl Into<String>) -> bool {
        self.emit(ClientEvent::IncomingCall { call_id, peer_id: peer_id.into() })
    }

    /// A call produced a media stream.
    pub fn call_stream(&self, call_id: CallId) -> bool {
        self.emit(ClientEvent::CallStream { call_id })
    }

    /// A call failed.
    pub fn call_error(&self, call_id: CallId, reason: impl Into<String>) -> bool {
        self.emit(ClientEvent::CallError { call_id, reason: reason.into() })
    }

    /// A call closed.
    pub fn call_closed(&self, call_id: CallId) -> bool {
        self.emit(ClientEvent::CallClosed { call_id })
    }

    /// Whether the runtime has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Returns `false` if the runtime has stopped.
    fn emit(&self, event: ClientEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Runtime side of the notification channel.
#[derive(Debug)]
pub struct EventInbox {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl EventInbox {
    pub(crate) async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }
}
