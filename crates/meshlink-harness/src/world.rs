//! Simulated mesh: one real client, a room, and scripted devices.
//!
//! The world owns a [`Client`] and plays the transport for it. Every action
//! the client returns is executed against the simulated room and devices,
//! and whatever that causes is queued back as client events. Delivery is
//! synchronous and in order; time only advances through
//! [`SimWorld::advance`].

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    time::Duration,
};

use meshlink_client::{
    Client, ClientAction, ClientConfig, ClientError, ClientEvent, ClientState, Completion,
    FetchOptions, Notification, OperationId, Response, StreamingOutcome,
};
use meshlink_proto::{
    CallId, CallOptions, Envelope, FrameData, Payload, RoomEvent, RoomRequest, StreamHandle,
};
use serde_json::Value;

use crate::{
    sim_device::{DeviceOutput, SimDevice},
    sim_env::SimEnv,
};

/// Peer id the simulated transport assigns to the client.
pub const LOCAL_PEER_ID: &str = "client-local";

/// A simulated mesh around one client.
pub struct SimWorld {
    env: SimEnv,
    client: Client<SimEnv>,
    room: String,

    devices: BTreeMap<String, SimDevice>,
    /// Room members other than the client, in join order.
    members: Vec<String>,
    /// Data connections the client has open.
    open: HashSet<String>,
    /// Live calls and the peer on the other end.
    calls: HashMap<CallId, String>,
    room_silent: bool,
    next_call: u64,
    next_op: u64,

    queue: VecDeque<ClientEvent>,
    completions: Vec<(OperationId, Completion)>,
    notifications: Vec<Notification>,
    transport_log: Vec<(String, String)>,
}

impl SimWorld {
    /// World with default client config for room `room`.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, ClientConfig::for_room("room"))
    }

    /// World with a specific client config.
    pub fn with_config(seed: u64, config: ClientConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let room = config.room.clone();

        Self {
            client: Client::new(env.clone(), config),
            env,
            room,
            devices: BTreeMap::new(),
            members: Vec::new(),
            open: HashSet::new(),
            calls: HashMap::new(),
            room_silent: false,
            next_call: 1,
            next_op: 1,
            queue: VecDeque::new(),
            completions: Vec::new(),
            notifications: Vec::new(),
            transport_log: Vec::new(),
        }
    }

    /// Put a device in the room. After start, this is a member-join.
    pub fn add_device(&mut self, device: SimDevice) {
        let peer_id = device.peer_id().to_string();
        self.devices.insert(peer_id.clone(), device);
        self.add_member(peer_id);
    }

    /// Put a non-device peer in the room. After start, this is a
    /// member-join.
    pub fn add_member(&mut self, peer_id: impl Into<String>) {
        let peer_id = peer_id.into();
        if !self.members.contains(&peer_id) {
            self.members.push(peer_id.clone());
        }

        if self.client.state() == ClientState::Started {
            self.queue.push_back(ClientEvent::Room(RoomEvent::MemberJoined {
                room: self.room.clone(),
                peer_id,
            }));
            self.run();
        }
    }

    /// A peer leaves the room; its data connection closes with it.
    pub fn remove_member(&mut self, peer_id: &str) {
        self.members.retain(|member| member != peer_id);
        self.queue.push_back(ClientEvent::Room(RoomEvent::MemberLeft {
            room: self.room.clone(),
            peer_id: peer_id.to_string(),
        }));
        self.disconnect(peer_id);
    }

    /// Close the data connection to `peer_id`.
    pub fn disconnect(&mut self, peer_id: &str) {
        if self.open.remove(peer_id) {
            self.queue.push_back(ClientEvent::ConnectionClosed { peer_id: peer_id.to_string() });
        }
        self.run();
    }

    /// Stop answering room signaling (bootstrap will time out).
    pub fn silence_room(&mut self) {
        self.room_silent = true;
    }

    /// Feed `Start` and the transport's peer id assignment.
    pub fn start(&mut self) -> Result<(), ClientError> {
        let actions = self.client.start()?;
        self.execute_all(actions);
        self.queue.push_back(ClientEvent::TransportReady { peer_id: LOCAL_PEER_ID.to_string() });
        self.run();
        Ok(())
    }

    /// Advance virtual time, then tick the client.
    pub fn advance(&mut self, duration: Duration) {
        let now = self.env.advance(duration);
        self.queue.push_back(ClientEvent::Tick { now });
        self.run();
    }

    /// Advance in `step` increments until `total` has elapsed.
    pub fn advance_by_steps(&mut self, total: Duration, step: Duration) {
        let step = step.max(Duration::from_millis(1));
        let mut remaining = total;
        while !remaining.is_zero() {
            let delta = remaining.min(step);
            self.advance(delta);
            remaining -= delta;
        }
    }

    /// Publish through the client.
    pub fn publish(&mut self, topic: &str, payload: impl Into<Value>) -> Result<(), ClientError> {
        let actions = self.client.publish(topic, payload)?;
        self.execute_all(actions);
        self.run();
        Ok(())
    }

    /// Subscribe through the client.
    pub fn subscribe(&mut self, filter: &str) -> bool {
        self.client.subscribe(filter)
    }

    /// Unsubscribe through the client.
    pub fn unsubscribe(&mut self, filter: &str) -> bool {
        self.client.unsubscribe(filter)
    }

    /// Issue a fetch and deliver whatever the device does in response.
    pub fn fetch(&mut self, target: &str, options: &FetchOptions) -> Result<OperationId, ClientError> {
        let op = self.allocate_op();
        let actions = self.client.fetch(op, target, options)?;
        self.execute_all(actions);
        self.run();
        Ok(op)
    }

    /// Ask a device to stream to the client.
    pub fn request_streaming(&mut self, uuid: &str) -> Result<OperationId, ClientError> {
        let op = self.allocate_op();
        let actions = self.client.request_streaming(op, uuid)?;
        self.execute_all(actions);
        self.run();
        Ok(op)
    }

    /// Stop a device's stream.
    pub fn stop_streaming(&mut self, uuid: &str) -> Result<OperationId, ClientError> {
        let op = self.allocate_op();
        let actions = self.client.stop_streaming(op, uuid)?;
        self.execute_all(actions);
        self.run();
        Ok(op)
    }

    /// Stream local media to a device.
    pub fn send_stream(&mut self, uuid: &str) -> Result<OperationId, ClientError> {
        let op = self.allocate_op();
        let actions =
            self.client.send_stream(op, uuid, StreamHandle(op.0), CallOptions::default())?;
        self.execute_all(actions);
        self.run();
        Ok(op)
    }

    /// Deliver a raw frame to the client as if `peer_id` sent it.
    pub fn inject(&mut self, peer_id: &str, data: impl Into<FrameData>) {
        self.queue.push_back(ClientEvent::DataReceived {
            peer_id: peer_id.to_string(),
            data: data.into(),
        });
        self.run();
    }

    /// A device publishes `payload` on `topic` to the client.
    pub fn device_publish(&mut self, peer_id: &str, topic: &str, payload: Payload) {
        match Envelope::new(topic, payload).encode() {
            Ok(frame) => self.inject(peer_id, frame),
            Err(e) => tracing::warn!("Failed to encode publish from {}: {}", peer_id, e),
        }
    }

    /// A device calls the client without being asked.
    pub fn device_call(&mut self, peer_id: &str) -> CallId {
        let call_id = self.allocate_call(peer_id);
        self.queue.push_back(ClientEvent::IncomingCall { call_id, peer_id: peer_id.to_string() });
        self.run();
        call_id
    }

    /// The remote end hangs up every call with `peer_id`.
    pub fn hang_up(&mut self, peer_id: &str) {
        for call_id in self.calls_with(peer_id) {
            self.calls.remove(&call_id);
            self.queue.push_back(ClientEvent::CallClosed { call_id });
        }
        self.run();
    }

    /// Every call with `peer_id` fails.
    pub fn fail_calls(&mut self, peer_id: &str, reason: &str) {
        for call_id in self.calls_with(peer_id) {
            self.calls.remove(&call_id);
            self.queue.push_back(ClientEvent::CallError { call_id, reason: reason.to_string() });
        }
        self.run();
    }

    /// The client under test.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// A device by peer id.
    pub fn device(&self, peer_id: &str) -> Option<&SimDevice> {
        self.devices.get(peer_id)
    }

    /// Whether a data connection to `peer_id` is open.
    pub fn is_open(&self, peer_id: &str) -> bool {
        self.open.contains(peer_id)
    }

    /// Number of live calls.
    pub fn live_calls(&self) -> usize {
        self.calls.len()
    }

    /// Every completion, in order.
    pub fn completions(&self) -> &[(OperationId, Completion)] {
        &self.completions
    }

    /// Completions recorded for `op` (more than one is a bug).
    pub fn completions_for(&self, op: OperationId) -> Vec<&Completion> {
        self.completions.iter().filter(|(id, _)| *id == op).map(|(_, c)| c).collect()
    }

    /// First completion for `op`.
    pub fn completion(&self, op: OperationId) -> Option<&Completion> {
        self.completions.iter().find(|(id, _)| *id == op).map(|(_, c)| c)
    }

    /// Fetch result for `op`, if settled.
    pub fn fetch_result(&self, op: OperationId) -> Option<&Result<Response, ClientError>> {
        match self.completion(op)? {
            Completion::Fetch(result) => Some(result),
            Completion::Streaming(_) => None,
        }
    }

    /// Streaming result for `op`, if settled.
    pub fn streaming_result(
        &self,
        op: OperationId,
    ) -> Option<&Result<StreamingOutcome, ClientError>> {
        match self.completion(op)? {
            Completion::Streaming(result) => Some(result),
            Completion::Fetch(_) => None,
        }
    }

    /// Every notification, in order.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Drain recorded notifications.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Every `(peer, frame)` the client sent, in order.
    pub fn transport_log(&self) -> &[(String, String)] {
        &self.transport_log
    }

    /// Frames the client sent to `peer_id`.
    pub fn sent_to<'a>(&'a self, peer_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.transport_log
            .iter()
            .filter(move |(peer, _)| peer == peer_id)
            .map(|(_, frame)| frame.as_str())
    }

    /// Process queued events until nothing is left.
    fn run(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            match self.client.handle(event) {
                Ok(actions) => self.execute_all(actions),
                Err(e) => tracing::warn!("Client rejected event: {}", e),
            }
        }
    }

    fn execute_all(&mut self, actions: Vec<ClientAction>) {
        for action in actions {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: ClientAction) {
        match action {
            ClientAction::Connect { peer_id } => {
                if self.devices.contains_key(&peer_id) && self.members.contains(&peer_id) {
                    self.open.insert(peer_id.clone());
                    self.queue.push_back(ClientEvent::ConnectionOpened { peer_id });
                } else {
                    self.queue.push_back(ClientEvent::ConnectionError {
                        peer_id: peer_id.clone(),
                        reason: "peer unavailable".to_string(),
                    });
                    self.queue.push_back(ClientEvent::ConnectionClosed { peer_id });
                }
            },
            ClientAction::Send { peer_id, frame } => {
                self.transport_log.push((peer_id.clone(), frame.clone()));
                if !self.open.contains(&peer_id) {
                    return;
                }
                let outputs = match self.devices.get_mut(&peer_id) {
                    Some(device) => device.on_frame(&frame),
                    None => return,
                };
                for output in outputs {
                    self.device_output(&peer_id, output);
                }
            },
            ClientAction::Room(request) => self.room_request(request),
            ClientAction::AnswerCall { call_id } => {
                if self.calls.contains_key(&call_id) {
                    self.queue.push_back(ClientEvent::CallStream { call_id });
                }
            },
            ClientAction::CloseCall { call_id } => {
                if self.calls.remove(&call_id).is_some() {
                    self.queue.push_back(ClientEvent::CallClosed { call_id });
                }
            },
            ClientAction::PlaceCall { call_id, peer_id, .. } => {
                let accepts = self
                    .devices
                    .get(&peer_id)
                    .is_some_and(|device| device.accepts_calls() && self.open.contains(&peer_id));
                if accepts {
                    self.calls.insert(call_id, peer_id);
                    self.queue.push_back(ClientEvent::CallStream { call_id });
                } else {
                    self.queue.push_back(ClientEvent::CallError {
                        call_id,
                        reason: "call rejected".to_string(),
                    });
                }
            },
            ClientAction::Complete { op, completion } => self.completions.push((op, completion)),
            ClientAction::Notify(notification) => self.notifications.push(notification),
        }
    }

    fn device_output(&mut self, peer_id: &str, output: DeviceOutput) {
        match output {
            DeviceOutput::Frame(frame) => self.queue.push_back(ClientEvent::DataReceived {
                peer_id: peer_id.to_string(),
                data: FrameData::from(frame),
            }),
            DeviceOutput::Call { peer_id: target } => {
                if target != LOCAL_PEER_ID {
                    return;
                }
                let call_id = self.allocate_call(peer_id);
                self.queue
                    .push_back(ClientEvent::IncomingCall { call_id, peer_id: peer_id.to_string() });
            },
        }
    }

    fn room_request(&mut self, request: RoomRequest) {
        if self.room_silent {
            return;
        }

        let event = match request {
            RoomRequest::Join { room } => {
                RoomEvent::JoinAck { room, peer_id: LOCAL_PEER_ID.to_string() }
            },
            RoomRequest::ListMembers { room } => {
                let mut members = vec![LOCAL_PEER_ID.to_string()];
                members.extend(self.members.iter().cloned());
                RoomEvent::MemberList { room, members }
            },
        };
        self.queue.push_back(ClientEvent::Room(event));
    }

    fn calls_with(&self, peer_id: &str) -> Vec<CallId> {
        let mut calls: Vec<CallId> = self
            .calls
            .iter()
            .filter(|(_, peer)| peer.as_str() == peer_id)
            .map(|(call_id, _)| *call_id)
            .collect();
        calls.sort();
        calls
    }

    fn allocate_call(&mut self, peer_id: &str) -> CallId {
        // Device-originated ids live in the upper half so they never collide
        // with ids the client draws.
        let call_id = CallId((1 << 63) | self.next_call);
        self.next_call += 1;
        self.calls.insert(call_id, peer_id.to_string());
        call_id
    }

    fn allocate_op(&mut self) -> OperationId {
        let op = OperationId(self.next_op);
        self.next_op += 1;
        op
    }

    /// Check structural invariants that must hold after every step.
    ///
    /// # Errors
    ///
    /// Describes the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut settled = HashSet::new();
        for (op, _) in &self.completions {
            if !settled.insert(*op) {
                return Err(format!("{op} settled more than once"));
            }
        }

        let mut uuids = HashSet::new();
        for device in self.client.devices() {
            if !uuids.insert(device.uuid()) {
                return Err(format!("uuid {} registered twice", device.uuid()));
            }
            if !self.open.contains(device.peer_id()) {
                return Err(format!(
                    "device {} registered on closed connection {}",
                    device.uuid(),
                    device.peer_id()
                ));
            }
        }

        if self.client.partial_replies() > self.client.pending_fetches() {
            return Err("chunk assembly outlived its request".to_string());
        }

        Ok(())
    }
}
