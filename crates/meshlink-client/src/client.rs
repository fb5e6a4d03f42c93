//! Client state machine.
//!
//! The `Client` is the top-level orchestrator. It drives the bootstrap
//! sequence, routes every inbound frame through the codec, and exposes the
//! public operations (publish, subscribe, fetch, streaming). Pure state
//! machine: it returns actions and never performs I/O itself.

use std::{collections::HashSet, time::Instant};

use meshlink_core::{
    Bootstrap, BootstrapStep, ClientState, Correlator, DeviceRegistry, Environment, FetchOptions,
    Inbound, KeepaliveSchedule, OperationId, ReplyOutcome, StreamingControl, StreamingEffect,
    SubscriptionSet, codec, registry::Device, rpc, topic,
};
use meshlink_proto::{
    CallId, CallOptions, ControlFrame, DeviceProfile, Envelope, FrameData, Payload, RoomEvent,
    RpcReply, StreamHandle,
};
use serde_json::Value;

use crate::{
    config::ClientConfig,
    error::ClientError,
    event::{ClientAction, ClientEvent, Completion, Notification},
};

/// Operation name reported by fetch timeouts.
const FETCH: &str = "fetch";

/// Client state machine.
///
/// Owns the device registry, subscription set, pending-request table and
/// streaming exchanges for one client instance. Every table is mutated only
/// from [`Client::handle`] (or the operation methods it dispatches to), so a
/// host that serializes calls needs no further locking.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time/randomness
pub struct Client<E: Environment> {
    config: ClientConfig,
    bootstrap: Bootstrap,
    registry: DeviceRegistry,
    subscriptions: SubscriptionSet,
    correlator: Correlator,
    streaming: StreamingControl,
    keepalive: KeepaliveSchedule,

    /// Device peers we asked the transport to connect to, not yet open.
    connecting: HashSet<String>,

    env: E,
}

impl<E: Environment> Client<E> {
    /// Create an idle client. Call [`Client::start`] (or feed
    /// [`ClientEvent::Start`]) to begin bootstrapping.
    pub fn new(env: E, config: ClientConfig) -> Self {
        let bootstrap = Bootstrap::new(
            config.room.clone(),
            config.device_prefix.clone(),
            config.bootstrap_timeout(),
        );
        let keepalive = KeepaliveSchedule::new(config.keepalive_interval());

        Self {
            config,
            bootstrap,
            registry: DeviceRegistry::new(),
            subscriptions: SubscriptionSet::new(),
            correlator: Correlator::new(),
            streaming: StreamingControl::new(),
            keepalive,
            connecting: HashSet::new(),
            env,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.bootstrap.state()
    }

    /// Whether bootstrap failed.
    pub fn is_failed(&self) -> bool {
        self.bootstrap.is_failed()
    }

    /// Our peer id, once assigned.
    pub fn local_peer_id(&self) -> Option<&str> {
        self.bootstrap.local_peer_id()
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Registered devices in registration order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.registry.iter()
    }

    /// Device registered under `uuid`.
    pub fn device(&self, uuid: &str) -> Option<&Device> {
        self.registry.get(uuid)
    }

    /// Whether `uuid` is registered.
    pub fn has_device(&self, uuid: &str) -> bool {
        self.registry.exists(uuid)
    }

    /// Current subscription filters.
    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// Number of fetches awaiting a reply.
    pub fn pending_fetches(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Number of partially received chunked replies.
    pub fn partial_replies(&self) -> usize {
        self.correlator.assembly_count()
    }

    /// Number of streaming exchanges in flight.
    pub fn streaming_in_flight(&self) -> usize {
        self.streaming.in_flight()
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` when an operation is rejected synchronously
    /// (validation, unknown device, not started). Transport notifications
    /// never fail; malformed frames are logged and dropped.
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Start => self.start(),
            ClientEvent::TransportReady { peer_id } => Ok(self.handle_transport_ready(&peer_id)),
            ClientEvent::Room(event) => Ok(self.handle_room_event(&event)),
            ClientEvent::ConnectionOpened { peer_id } => Ok(self.handle_connection_opened(&peer_id)),
            ClientEvent::DataReceived { peer_id, data } => Ok(self.handle_data(&peer_id, &data)),
            ClientEvent::ConnectionClosed { peer_id } => Ok(self.handle_connection_closed(&peer_id)),
            ClientEvent::ConnectionError { peer_id, reason } => {
                tracing::warn!("Connection error on {}: {}", peer_id, reason);
                Ok(vec![ClientAction::Notify(Notification::TransportError { peer_id, reason })])
            },
            ClientEvent::IncomingCall { call_id, peer_id } => {
                let effects = self.streaming.on_incoming_call(&mut self.registry, call_id, &peer_id);
                Ok(Self::convert_streaming_effects(effects))
            },
            ClientEvent::CallStream { call_id } => {
                Ok(Self::convert_streaming_effects(self.streaming.on_call_stream(call_id)))
            },
            ClientEvent::CallError { call_id, reason } => {
                let effects = self.streaming.on_call_error(&mut self.registry, call_id, &reason);
                Ok(Self::convert_streaming_effects(effects))
            },
            ClientEvent::CallClosed { call_id } => {
                let effects = self.streaming.on_call_closed(&mut self.registry, call_id);
                Ok(Self::convert_streaming_effects(effects))
            },
            ClientEvent::Tick { now } => Ok(self.handle_tick(now)),
            ClientEvent::Publish { topic, payload } => self.publish(&topic, payload),
            ClientEvent::Subscribe { topic } => {
                self.subscribe(topic);
                Ok(Vec::new())
            },
            ClientEvent::Unsubscribe { topic } => {
                self.unsubscribe(&topic);
                Ok(Vec::new())
            },
            ClientEvent::Fetch { op, target, options } => self.fetch(op, &target, &options),
            ClientEvent::RequestStreaming { op, uuid } => self.request_streaming(op, &uuid),
            ClientEvent::StopStreaming { op, uuid } => self.stop_streaming(op, &uuid),
            ClientEvent::SendStream { op, uuid, stream, options } => {
                self.send_stream(op, &uuid, stream, options)
            },
        }
    }

    /// Begin bootstrapping.
    ///
    /// # Errors
    ///
    /// - `ClientError::Bootstrap` if already started
    pub fn start(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let steps = self.bootstrap.start(self.env.now())?;
        Ok(self.convert_bootstrap_steps(steps))
    }

    /// Publish `payload` on `topic` to every registered device.
    ///
    /// Unicast fan-out in registration order; no acknowledgment.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotStarted` before bootstrap completes
    /// - `ClientError::InvalidTopic` for an empty or wildcard topic
    /// - `ClientError::InvalidPayload` unless `payload` is a string or a
    ///   structured object
    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Value>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.require_started()?;

        if !topic::is_publishable(topic) {
            return Err(ClientError::InvalidTopic { topic: topic.to_string() });
        }

        let payload = Payload::try_from(payload.into())
            .map_err(|e| ClientError::InvalidPayload { reason: e.to_string() })?;

        let frame = Envelope::new(topic, payload)
            .encode()
            .map_err(|e| ClientError::Encode { reason: e.to_string() })?;

        Ok(self
            .registry
            .iter()
            .map(|device| ClientAction::Send {
                peer_id: device.peer_id().to_string(),
                frame: frame.clone(),
            })
            .collect())
    }

    /// Add a subscription filter. Returns `false` if already subscribed.
    pub fn subscribe(&mut self, filter: impl Into<String>) -> bool {
        self.subscriptions.insert(filter)
    }

    /// Remove a subscription filter. Absent filters are a no-op.
    pub fn unsubscribe(&mut self, filter: &str) -> bool {
        self.subscriptions.remove(filter)
    }

    /// Send an RPC request to `<uuid>/<path>`.
    ///
    /// The result arrives later as [`ClientAction::Complete`] with
    /// [`Completion::Fetch`].
    ///
    /// # Errors
    ///
    /// - `ClientError::NotStarted` before bootstrap completes
    /// - `ClientError::InvalidPath` for a malformed target
    /// - `ClientError::NoConnection` if the uuid is not registered; no frame
    ///   is sent
    pub fn fetch(
        &mut self,
        op: OperationId,
        target: &str,
        options: &FetchOptions,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.require_started()?;

        let (uuid, path) = rpc::parse_target(target)?;
        let peer_id = self
            .registry
            .connection(uuid)
            .ok_or_else(|| ClientError::NoConnection { uuid: uuid.to_string() })?
            .to_string();

        let timeout = options.timeout.unwrap_or_else(|| self.config.fetch_timeout());
        let (_, frame) = self.correlator.begin(
            op,
            uuid,
            path,
            options,
            self.env.now(),
            timeout,
            self.env.wall_clock_millis(),
        )?;

        Ok(vec![ClientAction::Send { peer_id, frame }])
    }

    /// Ask device `uuid` to stream to us.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotStarted` before bootstrap completes
    /// - `ClientError::NoConnection`, `StreamingInProgress` or
    ///   `AlreadyStreaming` as reported by streaming control
    pub fn request_streaming(
        &mut self,
        op: OperationId,
        uuid: &str,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let local_peer_id = self.require_started()?;

        let effects = self.streaming.request(
            &self.registry,
            op,
            uuid,
            &local_peer_id,
            self.env.now(),
            self.config.streaming_timeout(),
        )?;

        Ok(Self::convert_streaming_effects(effects))
    }

    /// Stop device `uuid`'s stream.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotStarted` before bootstrap completes
    /// - `ClientError::NotStreaming` if no call is recorded for `uuid`
    pub fn stop_streaming(
        &mut self,
        op: OperationId,
        uuid: &str,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.require_started()?;

        let effects = self.streaming.stop(
            &mut self.registry,
            op,
            uuid,
            self.env.now(),
            self.config.streaming_timeout(),
        )?;

        Ok(Self::convert_streaming_effects(effects))
    }

    /// Stream local media to device `uuid`.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotStarted` before bootstrap completes
    /// - `ClientError::NoConnection` if the uuid is not registered
    pub fn send_stream(
        &mut self,
        op: OperationId,
        uuid: &str,
        stream: StreamHandle,
        options: CallOptions,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.require_started()?;

        let call_id = CallId(self.env.random_u64());
        let effects = self.streaming.send_stream(
            &self.registry,
            op,
            uuid,
            call_id,
            stream,
            options,
            self.env.now(),
            self.config.streaming_timeout(),
        )?;

        Ok(Self::convert_streaming_effects(effects))
    }

    /// Returns our peer id if bootstrap completed.
    fn require_started(&self) -> Result<String, ClientError> {
        match self.bootstrap.local_peer_id() {
            Some(peer_id) if self.bootstrap.is_started() => Ok(peer_id.to_string()),
            _ => Err(ClientError::NotStarted { state: self.bootstrap.state() }),
        }
    }

    fn handle_transport_ready(&mut self, peer_id: &str) -> Vec<ClientAction> {
        let steps = self.bootstrap.on_transport_ready(peer_id, self.env.now());
        self.convert_bootstrap_steps(steps)
    }

    fn handle_room_event(&mut self, event: &RoomEvent) -> Vec<ClientAction> {
        let steps = self.bootstrap.on_room_event(event, self.env.now());
        let mut actions = self.convert_bootstrap_steps(steps);

        if let RoomEvent::MemberLeft { room, peer_id } = event
            && *room == self.config.room
        {
            actions.extend(self.drop_peer(peer_id));
        }

        actions
    }

    /// A data connection opened: start the profile handshake and keepalives.
    fn handle_connection_opened(&mut self, peer_id: &str) -> Vec<ClientAction> {
        self.connecting.remove(peer_id);
        self.keepalive.start(peer_id, self.env.now());

        let request = self.registry.begin_handshake(peer_id);
        tracing::debug!("Connection opened to {}, requesting profile", peer_id);

        vec![ClientAction::Send { peer_id: peer_id.to_string(), frame: request.encode() }]
    }

    fn handle_connection_closed(&mut self, peer_id: &str) -> Vec<ClientAction> {
        tracing::debug!("Connection closed: {}", peer_id);
        self.drop_peer(peer_id)
    }

    /// Forget everything tied to `peer_id`'s connection.
    fn drop_peer(&mut self, peer_id: &str) -> Vec<ClientAction> {
        self.connecting.remove(peer_id);
        self.keepalive.stop(peer_id);
        self.registry.abandon_handshake(peer_id);

        match self.registry.unregister_peer(peer_id) {
            Some(device) => {
                tracing::debug!("Device {} disconnected", device.uuid());
                vec![ClientAction::Notify(Notification::DeviceDisconnected {
                    uuid: device.uuid().to_string(),
                })]
            },
            None => Vec::new(),
        }
    }

    /// Route one inbound frame. Never fails: bad frames are logged and
    /// dropped without touching the connection.
    fn handle_data(&mut self, peer_id: &str, data: &FrameData) -> Vec<ClientAction> {
        match codec::classify(data, &self.subscriptions) {
            Inbound::Control(frame) => self.handle_control(peer_id, frame),
            Inbound::Message(envelope) => {
                vec![ClientAction::Notify(Notification::Message {
                    topic: envelope.topic,
                    payload: envelope.payload,
                })]
            },
            Inbound::RpcReply(reply) => self.handle_reply(peer_id, reply),
            Inbound::Unrecognized(reason) => {
                tracing::warn!("Dropping frame from {}: {:?}", peer_id, reason);
                Vec::new()
            },
        }
    }

    fn handle_control(&mut self, peer_id: &str, frame: ControlFrame) -> Vec<ClientAction> {
        let ControlFrame::Json(value) = frame else {
            tracing::debug!("Ignoring control frame from {}: {:?}", peer_id, frame);
            return Vec::new();
        };

        let profile = match DeviceProfile::from_response(&value) {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::debug!("Ignoring control object from {}", peer_id);
                return Vec::new();
            },
            Err(e) => {
                tracing::warn!("Bad profile from {}: {}", peer_id, e);
                return Vec::new();
            },
        };

        match self.registry.complete_handshake(peer_id, profile.clone()) {
            Ok(registration) => {
                if let Some(displaced) = registration.displaced {
                    self.keepalive.stop(&displaced);
                }
                vec![ClientAction::Notify(Notification::DeviceConnected {
                    uuid: registration.uuid,
                    profile,
                })]
            },
            Err(e) => {
                tracing::warn!("{}", e);
                Vec::new()
            },
        }
    }

    fn handle_reply(&mut self, peer_id: &str, reply: RpcReply) -> Vec<ClientAction> {
        match self.correlator.on_reply(reply) {
            ReplyOutcome::Settled { op, response } => {
                tracing::debug!(
                    "Fetch {} settled by {} (transaction {})",
                    op,
                    peer_id,
                    response.transaction_id()
                );
                vec![ClientAction::Complete { op, completion: Completion::Fetch(Ok(response)) }]
            },
            ReplyOutcome::Buffered { transaction_id, received, total } => {
                tracing::debug!(
                    "Transaction {}: {}/{} chunks from {}",
                    transaction_id,
                    received,
                    total,
                    peer_id
                );
                Vec::new()
            },
            ReplyOutcome::Unmatched { transaction_id } => {
                tracing::warn!("Reply for unknown transaction {} from {}", transaction_id, peer_id);
                Vec::new()
            },
            ReplyOutcome::Rejected { transaction_id, error } => {
                tracing::warn!("Dropping fragment of transaction {}: {}", transaction_id, error);
                Vec::new()
            },
        }
    }

    /// Expire deadlines and send due keepalives.
    fn handle_tick(&mut self, now: Instant) -> Vec<ClientAction> {
        let steps = self.bootstrap.expire(now);
        let mut actions = self.convert_bootstrap_steps(steps);

        for pending in self.correlator.expire(now) {
            tracing::warn!(
                "Fetch {} to {} timed out (transaction {})",
                pending.op,
                pending.uuid,
                pending.transaction_id
            );
            actions.push(ClientAction::Complete {
                op: pending.op,
                completion: Completion::Fetch(Err(ClientError::Timeout { operation: FETCH })),
            });
        }

        actions.extend(Self::convert_streaming_effects(self.streaming.expire(&mut self.registry, now)));

        let due = self.keepalive.due(now);
        if let Some(local) = self.bootstrap.local_peer_id() {
            let frame = ControlFrame::Keepalive { peer_id: local.to_string() }.encode();
            actions.extend(
                due.into_iter().map(|peer_id| ClientAction::Send { peer_id, frame: frame.clone() }),
            );
        }

        actions
    }

    fn convert_bootstrap_steps(&mut self, steps: Vec<BootstrapStep>) -> Vec<ClientAction> {
        let mut actions = Vec::with_capacity(steps.len());

        for step in steps {
            match step {
                BootstrapStep::Transition(state) => {
                    actions.push(ClientAction::Notify(Notification::StateChanged { state }));
                },
                BootstrapStep::SendRoom(request) => actions.push(ClientAction::Room(request)),
                BootstrapStep::ConnectDevice(peer_id) => {
                    if self.registry.uuid_for_peer(&peer_id).is_some()
                        || !self.connecting.insert(peer_id.clone())
                    {
                        continue;
                    }
                    actions.push(ClientAction::Connect { peer_id });
                },
                BootstrapStep::Started => {
                    let peer_id = self.bootstrap.local_peer_id().unwrap_or_default().to_string();
                    tracing::info!("Client {} started in room {}", peer_id, self.config.room);
                    actions.push(ClientAction::Notify(Notification::Connected { peer_id }));
                },
                BootstrapStep::Failed(error) => {
                    actions.push(ClientAction::Notify(Notification::StartFailed {
                        error: error.into(),
                    }));
                },
            }
        }

        actions
    }

    fn convert_streaming_effects(effects: Vec<StreamingEffect>) -> Vec<ClientAction> {
        effects
            .into_iter()
            .map(|effect| match effect {
                StreamingEffect::Send { peer_id, frame } => ClientAction::Send { peer_id, frame },
                StreamingEffect::Answer(call_id) => ClientAction::AnswerCall { call_id },
                StreamingEffect::Close(call_id) => ClientAction::CloseCall { call_id },
                StreamingEffect::Place { call_id, peer_id, stream, options } => {
                    ClientAction::PlaceCall { call_id, peer_id, stream, options }
                },
                StreamingEffect::Settle { op, result } => ClientAction::Complete {
                    op,
                    completion: Completion::Streaming(result.map_err(ClientError::from)),
                },
                StreamingEffect::Unclaimed { call_id, peer_id } => {
                    ClientAction::Notify(Notification::UnclaimedCall { call_id, peer_id })
                },
                StreamingEffect::StreamClosed { uuid, call_id } => {
                    ClientAction::Notify(Notification::StreamClosed { uuid, call_id })
                },
                StreamingEffect::StreamError { uuid, call_id, reason } => {
                    ClientAction::Notify(Notification::StreamError { uuid, call_id, reason })
                },
            })
            .collect()
    }
}
