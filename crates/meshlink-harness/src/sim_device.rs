//! Scripted device peers.
//!
//! A `SimDevice` answers the frames a real device would: the profile
//! handshake, RPC requests (by route, optionally chunked and reordered) and
//! stream start/stop. Everything it receives is recorded for assertions.

use std::collections::HashMap;

use meshlink_proto::{ChunkFragment, ControlFrame, DeviceProfile, Envelope, RpcReply, RpcRequest};
use serde_json::{Value, json};

/// How a route delivers its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// One non-chunked frame.
    Single,
    /// The body as a string, split into `chunk_size`-character fragments
    /// sent in `order`.
    Chunked {
        /// Characters per fragment. Zero is treated as one.
        chunk_size: usize,
        /// Fragment send order.
        order: ChunkOrder,
    },
    /// Never reply.
    Silent,
}

/// Order in which chunk fragments are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOrder {
    /// `0, 1, 2, ...`
    InOrder,
    /// `n-1, ..., 1, 0`
    Reversed,
    /// Explicit indices. May repeat or omit fragments.
    Custom(Vec<usize>),
}

/// Scripted reply for one `(method, path)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Reply status.
    pub status: u16,
    /// Reply body.
    pub body: Value,
    /// How the reply is delivered.
    pub delivery: Delivery,
}

impl Route {
    /// `200` with `body` in one frame.
    pub fn ok(body: impl Into<Value>) -> Self {
        Self { status: 200, body: body.into(), delivery: Delivery::Single }
    }

    /// `200` with `body` split into fragments.
    pub fn chunked(body: impl Into<String>, chunk_size: usize, order: ChunkOrder) -> Self {
        Self {
            status: 200,
            body: Value::String(body.into()),
            delivery: Delivery::Chunked { chunk_size, order },
        }
    }

    /// A route that never answers.
    pub fn silent() -> Self {
        Self { status: 200, body: Value::Null, delivery: Delivery::Silent }
    }

    /// Override the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// How the device reacts to a stream-start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingBehavior {
    /// Call the requester back.
    CallBack,
    /// Ignore the request.
    Ignore,
}

/// Something the device does in response to a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutput {
    /// Send a text frame to the client.
    Frame(String),
    /// Call the given peer.
    Call {
        /// Peer to call back.
        peer_id: String,
    },
}

/// A simulated device.
#[derive(Debug, Clone)]
pub struct SimDevice {
    peer_id: String,
    uuid: String,
    profile: Option<DeviceProfile>,
    routes: HashMap<(String, String), Route>,
    streaming: StreamingBehavior,
    accepts_calls: bool,

    received: Vec<String>,
    requests: Vec<RpcRequest>,
    published: Vec<Envelope>,
    keepalives: usize,
    streaming_to: Option<String>,
}

impl SimDevice {
    /// Device `uuid` reachable as `peer_id`, answering the handshake with
    /// `{uuid, peerId, name}`.
    pub fn new(peer_id: impl Into<String>, uuid: impl Into<String>) -> Self {
        let peer_id = peer_id.into();
        let uuid = uuid.into();
        let profile = DeviceProfile::from_body(json!({
            "uuid": uuid,
            "peerId": peer_id,
            "name": format!("device {uuid}"),
            "streaming": true,
        }))
        .ok();

        Self {
            peer_id,
            uuid,
            profile,
            routes: HashMap::new(),
            streaming: StreamingBehavior::CallBack,
            accepts_calls: true,
            received: Vec::new(),
            requests: Vec::new(),
            published: Vec::new(),
            keepalives: 0,
            streaming_to: None,
        }
    }

    /// Replace the handshake profile. The device's uuid follows the profile.
    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        profile.uuid().clone_into(&mut self.uuid);
        self.profile = Some(profile);
        self
    }

    /// Never answer the profile request.
    pub fn without_handshake(mut self) -> Self {
        self.profile = None;
        self
    }

    /// Script a reply for `method path`.
    pub fn route(mut self, method: &str, path: &str, route: Route) -> Self {
        self.routes.insert((method.to_string(), path.to_string()), route);
        self
    }

    /// Set the stream-start behavior.
    pub fn with_streaming(mut self, streaming: StreamingBehavior) -> Self {
        self.streaming = streaming;
        self
    }

    /// Refuse inbound calls.
    pub fn rejecting_calls(mut self) -> Self {
        self.accepts_calls = false;
        self
    }

    /// Transport peer id.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Application uuid.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Handshake profile, if the device answers the handshake.
    pub fn profile(&self) -> Option<&DeviceProfile> {
        self.profile.as_ref()
    }

    /// Whether inbound calls are accepted.
    pub fn accepts_calls(&self) -> bool {
        self.accepts_calls
    }

    /// Every frame received, in order.
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// Every RPC request received, in order.
    pub fn requests(&self) -> &[RpcRequest] {
        &self.requests
    }

    /// Every pub/sub envelope received, in order.
    pub fn published(&self) -> &[Envelope] {
        &self.published
    }

    /// Number of keepalives received.
    pub fn keepalives(&self) -> usize {
        self.keepalives
    }

    /// Peer the device was asked to stream to and has not been stopped.
    pub fn streaming_to(&self) -> Option<&str> {
        self.streaming_to.as_deref()
    }

    /// React to one frame from the client.
    pub fn on_frame(&mut self, frame: &str) -> Vec<DeviceOutput> {
        self.received.push(frame.to_string());

        match ControlFrame::decode(frame) {
            Ok(Some(control)) => self.on_control(control),
            Ok(None) => self.on_envelope(frame),
            Err(e) => {
                tracing::debug!("{} ignoring bad control frame: {}", self.peer_id, e);
                Vec::new()
            },
        }
    }

    fn on_control(&mut self, frame: ControlFrame) -> Vec<DeviceOutput> {
        match frame {
            ControlFrame::ProfileRequest => self
                .profile
                .as_ref()
                .map(|profile| DeviceOutput::Frame(profile.to_response_frame().encode()))
                .into_iter()
                .collect(),
            ControlFrame::Keepalive { .. } => {
                self.keepalives += 1;
                Vec::new()
            },
            ControlFrame::StreamStart { peer_id } => match self.streaming {
                StreamingBehavior::CallBack => {
                    self.streaming_to = Some(peer_id.clone());
                    vec![DeviceOutput::Call { peer_id }]
                },
                StreamingBehavior::Ignore => Vec::new(),
            },
            ControlFrame::StreamStop => {
                self.streaming_to = None;
                Vec::new()
            },
            ControlFrame::Json(_) | ControlFrame::Other(_) => Vec::new(),
        }
    }

    fn on_envelope(&mut self, frame: &str) -> Vec<DeviceOutput> {
        let Ok(envelope) = Envelope::decode(frame) else {
            tracing::debug!("{} ignoring malformed frame", self.peer_id);
            return Vec::new();
        };

        if envelope.topic == self.uuid
            && let Ok(request) = RpcRequest::from_payload(&envelope.payload)
        {
            self.requests.push(request.clone());
            return self.reply(&request);
        }

        self.published.push(envelope);
        Vec::new()
    }

    fn reply(&self, request: &RpcRequest) -> Vec<DeviceOutput> {
        let transaction_id = request.transaction_id;
        let method = Some(request.method.clone());

        let route = self
            .routes
            .get(&(request.method.clone(), request.path.clone()))
            .cloned()
            .unwrap_or_else(|| Route::ok("not found").with_status(404));

        let replies = match route.delivery {
            Delivery::Single => vec![RpcReply::Complete {
                status: Some(route.status),
                transaction_id,
                method,
                body: route.body,
            }],
            Delivery::Chunked { chunk_size, order } => {
                let text = match route.body {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                let chunks = split_chunks(&text, chunk_size.max(1));
                let total = chunks.len();

                let indices: Vec<usize> = match order {
                    ChunkOrder::InOrder => (0..total).collect(),
                    ChunkOrder::Reversed => (0..total).rev().collect(),
                    ChunkOrder::Custom(indices) => indices,
                };

                indices
                    .into_iter()
                    .filter_map(|index| {
                        let chunk = chunks.get(index)?.clone();
                        Some(RpcReply::Chunk(ChunkFragment {
                            status: Some(route.status),
                            transaction_id,
                            method: method.clone(),
                            total,
                            index,
                            chunk,
                        }))
                    })
                    .collect()
            },
            Delivery::Silent => Vec::new(),
        };

        replies.iter().filter_map(|reply| self.encode_reply(reply)).map(DeviceOutput::Frame).collect()
    }

    /// Encode a reply envelope addressed by this device's uuid.
    pub fn encode_reply(&self, reply: &RpcReply) -> Option<String> {
        let encoded = reply
            .to_payload()
            .and_then(|payload| Envelope::new(self.uuid.clone(), payload).encode());

        match encoded {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!("{} failed to encode reply: {}", self.peer_id, e);
                None
            },
        }
    }
}

/// Split `text` into fragments of at most `size` characters. Empty text is
/// one empty fragment.
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(size).map(|chunk| chunk.iter().collect()).collect()
}
