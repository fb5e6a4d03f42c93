//! End-to-end tests of the tokio runtime against an in-process loopback mesh.
//!
//! The loopback answers room signaling, the profile handshake, RPC requests
//! and streaming requests the way a single device `SSG_abc` (uuid `abc`)
//! would.

#![allow(clippy::unwrap_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use meshlink_client::{ClientConfig, ClientError, FetchOptions, Notification, StreamingOutcome};
use meshlink_proto::{
    CallId, CallOptions, ChunkFragment, ControlFrame, DeviceProfile, Envelope, RoomEvent,
    RoomRequest, RpcReply, RpcRequest, StreamHandle,
};
use meshlink_runtime::{
    ClientHandle, EventSink, Runtime, RuntimeConfig, RuntimeError, Transport, TransportError,
    channel,
};
use serde_json::json;

const LOCAL: &str = "client-1";
const DEVICE: &str = "SSG_abc";
const ROOM: &str = "r1";

/// One scripted device reachable through a fake transport.
struct LoopbackMesh {
    sink: EventSink,
    profile: DeviceProfile,
    sent: Mutex<Vec<(String, String)>>,
}

impl LoopbackMesh {
    fn new(sink: EventSink) -> Self {
        let profile =
            DeviceProfile::from_body(json!({"uuid": "abc", "peerId": DEVICE, "name": "sensor"}))
                .unwrap();
        Self { sink, profile, sent: Mutex::new(Vec::new()) }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn reply(&self, reply: &RpcReply) {
        let frame = Envelope::new("abc", reply.to_payload().unwrap()).encode().unwrap();
        self.sink.data(DEVICE, frame);
    }

    fn answer_request(&self, request: RpcRequest) {
        let transaction_id = request.transaction_id;
        match request.path.as_str() {
            "/led/on" => self.reply(&RpcReply::Complete {
                status: Some(200),
                transaction_id,
                method: Some(request.method),
                body: json!("OK"),
            }),
            "/sensors/dump" => {
                let chunks = ["aaa", "bbb", "ccc"];
                for index in [2, 0, 1] {
                    self.reply(&RpcReply::Chunk(ChunkFragment {
                        status: Some(200),
                        transaction_id,
                        method: Some(request.method.clone()),
                        total: chunks.len(),
                        index,
                        chunk: chunks[index].to_string(),
                    }));
                }
            },
            // Anything else is never answered.
            _ => {},
        }
    }
}

#[async_trait]
impl Transport for LoopbackMesh {
    async fn connect(&self, peer_id: &str) -> Result<(), TransportError> {
        if peer_id != DEVICE {
            return Err(TransportError::new(format!("unknown peer {peer_id}")));
        }
        self.sink.connection_opened(peer_id);
        Ok(())
    }

    async fn send(&self, peer_id: &str, frame: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((peer_id.to_string(), frame.to_string()));

        match ControlFrame::decode(frame).unwrap() {
            Some(ControlFrame::ProfileRequest) => {
                self.sink.data(DEVICE, self.profile.to_response_frame().encode());
            },
            Some(ControlFrame::StreamStart { peer_id }) => {
                assert_eq!(peer_id, LOCAL);
                self.sink.incoming_call(CallId(42), DEVICE);
            },
            Some(_) => {},
            None => {
                let envelope = Envelope::decode(frame).unwrap();
                if let Ok(request) = RpcRequest::from_payload(&envelope.payload) {
                    self.answer_request(request);
                }
            },
        }
        Ok(())
    }

    async fn room(&self, request: &RoomRequest) -> Result<(), TransportError> {
        let event = match request {
            RoomRequest::Join { room } => {
                RoomEvent::JoinAck { room: room.clone(), peer_id: LOCAL.to_string() }
            },
            RoomRequest::ListMembers { room } => RoomEvent::MemberList {
                room: room.clone(),
                members: vec![LOCAL.to_string(), DEVICE.to_string(), "viewer".to_string()],
            },
        };
        self.sink.room(event);
        Ok(())
    }

    async fn answer_call(&self, call_id: CallId) -> Result<(), TransportError> {
        self.sink.call_stream(call_id);
        Ok(())
    }

    async fn close_call(&self, call_id: CallId) -> Result<(), TransportError> {
        self.sink.call_closed(call_id);
        Ok(())
    }

    async fn place_call(
        &self,
        call_id: CallId,
        peer_id: &str,
        _stream: StreamHandle,
        _options: &CallOptions,
    ) -> Result<(), TransportError> {
        assert_eq!(peer_id, DEVICE);
        self.sink.call_stream(call_id);
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a runtime, bootstrap it, and wait for the device handshake.
async fn started() -> (ClientHandle, Arc<LoopbackMesh>) {
    init_tracing();

    let (sink, inbox) = channel();
    let mesh = Arc::new(LoopbackMesh::new(sink.clone()));
    let config = RuntimeConfig {
        client: ClientConfig { fetch_timeout_ms: 100, ..ClientConfig::for_room(ROOM) },
        tick_interval_ms: 5,
        ..RuntimeConfig::default()
    };

    let (runtime, handle) = Runtime::new(Arc::clone(&mesh), inbox, config);
    tokio::spawn(runtime.run());

    let mut notifications = handle.notifications();
    sink.transport_ready(LOCAL);
    assert_eq!(handle.start().await.unwrap(), LOCAL);

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Notification::DeviceConnected { uuid, .. } = notifications.recv().await.unwrap()
            {
                assert_eq!(uuid, "abc");
                break;
            }
        }
    })
    .await
    .unwrap();

    (handle, mesh)
}

#[tokio::test]
async fn bootstrap_registers_device() {
    let (handle, mesh) = started().await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.local_peer_id.as_deref(), Some(LOCAL));
    assert_eq!(status.devices.len(), 1);
    assert_eq!(status.devices[0].name(), Some("sensor"));

    // Only the device-named member was dialed and asked for its profile.
    assert_eq!(mesh.sent()[0], (DEVICE.to_string(), "SSG:profile/get".to_string()));
}

#[tokio::test]
async fn fetch_single_frame_reply() {
    let (handle, _mesh) = started().await;

    let response =
        handle.fetch("abc/led/on", FetchOptions::default().with_method("PUT")).await.unwrap();

    assert_eq!(response.status(), Some(200));
    assert_eq!(response.method(), Some("PUT"));
    assert_eq!(response.text(), "OK");
}

#[tokio::test]
async fn fetch_reassembles_out_of_order_chunks() {
    let (handle, _mesh) = started().await;

    let response = handle.fetch("abc/sensors/dump", FetchOptions::default()).await.unwrap();

    assert_eq!(response.text(), "aaabbbccc");
}

#[tokio::test]
async fn fetch_unknown_device_fails_immediately() {
    let (handle, _mesh) = started().await;

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        handle.fetch("missing/x", FetchOptions::default()),
    )
    .await
    .unwrap();

    assert_eq!(
        result,
        Err(RuntimeError::Client(ClientError::NoConnection { uuid: "missing".to_string() }))
    );
}

#[tokio::test]
async fn fetch_times_out_without_reply() {
    let (handle, _mesh) = started().await;

    let result = handle.fetch("abc/slow", FetchOptions::default()).await;

    assert!(result.unwrap_err().is_timeout());
}

#[tokio::test]
async fn publish_reaches_device() {
    let (handle, mesh) = started().await;

    handle.publish("lights/set", json!({"on": true})).await.unwrap();

    let (peer, frame) = mesh.sent().last().cloned().unwrap();
    assert_eq!(peer, DEVICE);
    assert_eq!(Envelope::decode(&frame).unwrap().topic, "lights/set");

    let err = handle.publish("lights/#", "x").await.unwrap_err();
    assert!(matches!(err, RuntimeError::Client(ClientError::InvalidTopic { .. })));
}

#[tokio::test]
async fn streaming_start_and_stop() {
    let (handle, _mesh) = started().await;

    let started = handle.request_streaming("abc").await.unwrap();
    assert_eq!(started, StreamingOutcome::Started { uuid: "abc".to_string(), call_id: CallId(42) });

    let stopped = handle.stop_streaming("abc").await.unwrap();
    assert_eq!(stopped, StreamingOutcome::Stopped { uuid: "abc".to_string() });

    let err = handle.stop_streaming("abc").await.unwrap_err();
    assert_eq!(err, RuntimeError::Client(ClientError::NotStreaming { uuid: "abc".to_string() }));
}

#[tokio::test]
async fn send_stream_places_call() {
    let (handle, _mesh) = started().await;

    let outcome =
        handle.send_stream("abc", StreamHandle(1), CallOptions::default()).await.unwrap();

    assert!(matches!(outcome, StreamingOutcome::Sending { ref uuid, .. } if uuid == "abc"));
}

#[tokio::test]
async fn shutdown_stops_operations() {
    let (handle, _mesh) = started().await;

    handle.shutdown().await;

    let result = handle.fetch("abc/led/on", FetchOptions::default()).await;
    assert_eq!(result, Err(RuntimeError::Stopped));
}
