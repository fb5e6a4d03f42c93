//! Streaming control.
//!
//! Media sessions are negotiated by the transport. This module only runs the
//! control handshake around them:
//!
//! ```text
//! request:  send SSG:stream/start,<self> ─> device calls back ─> answer
//!           ─> first stream event ─> Started
//! stop:     send SSG:stream/stop, close call ─> close event ─> Stopped
//! send:     place call to device ─> first stream event ─> Sending
//! ```
//!
//! Every exchange carries a deadline. Whichever of {counterpart event,
//! deadline} is handled first removes the exchange from its table, so each
//! operation settles exactly once.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use meshlink_proto::{CallId, CallOptions, ControlFrame, StreamHandle};

use crate::{error::StreamingError, operation::OperationId, registry::DeviceRegistry};

const REQUEST_STREAMING: &str = "requestStreaming";
const STOP_STREAMING: &str = "stopStreaming";
const SEND_STREAM: &str = "sendStream";

/// Successful result of a streaming operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingOutcome {
    /// The device is streaming to us on `call_id`.
    Started {
        /// Device uuid.
        uuid: String,
        /// The answered call.
        call_id: CallId,
    },
    /// The device's stream was closed.
    Stopped {
        /// Device uuid.
        uuid: String,
    },
    /// Our outbound call to the device is established.
    Sending {
        /// Device uuid.
        uuid: String,
        /// The placed call.
        call_id: CallId,
    },
}

/// Side effect requested by streaming control.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingEffect {
    /// Send a control frame on a device connection.
    Send {
        /// Connection to send on.
        peer_id: String,
        /// Encoded frame.
        frame: String,
    },
    /// Accept an inbound call.
    Answer(CallId),
    /// Close a call.
    Close(CallId),
    /// Originate a call carrying a local stream.
    Place {
        /// Id for the new call.
        call_id: CallId,
        /// Peer to call.
        peer_id: String,
        /// Local stream to attach.
        stream: StreamHandle,
        /// Transport options.
        options: CallOptions,
    },
    /// Settle a deferred operation.
    Settle {
        /// Operation to settle.
        op: OperationId,
        /// Its result.
        result: Result<StreamingOutcome, StreamingError>,
    },
    /// Inbound call not bound to any pending request.
    Unclaimed {
        /// The call.
        call_id: CallId,
        /// Caller.
        peer_id: String,
    },
    /// An established stream closed without a stop request.
    StreamClosed {
        /// Device uuid.
        uuid: String,
        /// The closed call.
        call_id: CallId,
    },
    /// An established stream failed.
    StreamError {
        /// Device uuid.
        uuid: String,
        /// The failed call.
        call_id: CallId,
        /// Transport-provided description.
        reason: String,
    },
}

#[derive(Debug, Clone)]
struct StreamRequest {
    op: OperationId,
    deadline: Instant,
    call: Option<CallId>,
}

#[derive(Debug, Clone)]
struct PendingCall {
    op: OperationId,
    uuid: String,
    deadline: Instant,
}

/// In-flight streaming exchanges.
#[derive(Debug, Default)]
pub struct StreamingControl {
    requests: HashMap<String, StreamRequest>,
    stops: HashMap<CallId, PendingCall>,
    outgoing: HashMap<CallId, PendingCall>,
}

impl StreamingControl {
    /// Create with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask `uuid` to stream to us.
    ///
    /// Sends the stream-start frame naming `local_peer_id` and waits for the
    /// device to call back.
    ///
    /// # Errors
    ///
    /// - `StreamingError::NoConnection` if `uuid` is not registered
    /// - `StreamingError::InProgress` if a request for `uuid` is in flight
    /// - `StreamingError::AlreadyStreaming` if `uuid` has a recorded call
    pub fn request(
        &mut self,
        registry: &DeviceRegistry,
        op: OperationId,
        uuid: &str,
        local_peer_id: &str,
        now: Instant,
        timeout: Duration,
    ) -> Result<Vec<StreamingEffect>, StreamingError> {
        let peer_id = registry
            .connection(uuid)
            .ok_or_else(|| StreamingError::NoConnection { uuid: uuid.to_string() })?;

        if self.requests.contains_key(uuid) {
            return Err(StreamingError::InProgress { uuid: uuid.to_string() });
        }

        if let Some(call_id) = registry.call(uuid) {
            return Err(StreamingError::AlreadyStreaming { uuid: uuid.to_string(), call_id });
        }

        self.requests
            .insert(uuid.to_string(), StreamRequest { op, deadline: now + timeout, call: None });

        let frame = ControlFrame::StreamStart { peer_id: local_peer_id.to_string() }.encode();
        Ok(vec![StreamingEffect::Send { peer_id: peer_id.to_string(), frame }])
    }

    /// Stop the stream recorded for `uuid`.
    ///
    /// The recorded call is released immediately; the operation settles on
    /// the call's close event.
    ///
    /// # Errors
    ///
    /// - `StreamingError::NotStreaming` if no call is recorded for `uuid`
    pub fn stop(
        &mut self,
        registry: &mut DeviceRegistry,
        op: OperationId,
        uuid: &str,
        now: Instant,
        timeout: Duration,
    ) -> Result<Vec<StreamingEffect>, StreamingError> {
        let not_streaming = || StreamingError::NotStreaming { uuid: uuid.to_string() };

        let call_id = registry.call(uuid).ok_or_else(not_streaming)?;
        let peer_id = registry.connection(uuid).ok_or_else(not_streaming)?.to_string();
        registry.set_call(uuid, None).map_err(|_| not_streaming())?;

        self.stops.insert(call_id, PendingCall { op, uuid: uuid.to_string(), deadline: now + timeout });

        Ok(vec![
            StreamingEffect::Send { peer_id, frame: ControlFrame::StreamStop.encode() },
            StreamingEffect::Close(call_id),
        ])
    }

    /// Originate a call to `uuid` carrying `stream`.
    ///
    /// # Errors
    ///
    /// - `StreamingError::NoConnection` if `uuid` is not registered
    #[allow(clippy::too_many_arguments)]
    pub fn send_stream(
        &mut self,
        registry: &DeviceRegistry,
        op: OperationId,
        uuid: &str,
        call_id: CallId,
        stream: StreamHandle,
        options: CallOptions,
        now: Instant,
        timeout: Duration,
    ) -> Result<Vec<StreamingEffect>, StreamingError> {
        let peer_id = registry
            .connection(uuid)
            .ok_or_else(|| StreamingError::NoConnection { uuid: uuid.to_string() })?;

        self.outgoing
            .insert(call_id, PendingCall { op, uuid: uuid.to_string(), deadline: now + timeout });

        Ok(vec![StreamingEffect::Place { call_id, peer_id: peer_id.to_string(), stream, options }])
    }

    /// An inbound call arrived from `peer_id`.
    ///
    /// Answered and recorded if the caller maps back to a device with a
    /// pending request; otherwise left unclaimed.
    pub fn on_incoming_call(
        &mut self,
        registry: &mut DeviceRegistry,
        call_id: CallId,
        peer_id: &str,
    ) -> Vec<StreamingEffect> {
        let claimed = registry.uuid_for_peer(peer_id).map(str::to_string).and_then(|uuid| {
            let request = self.requests.get_mut(&uuid)?;
            if request.call.is_some() {
                return None;
            }
            request.call = Some(call_id);
            Some(uuid)
        });

        match claimed {
            Some(uuid) => {
                tracing::debug!("Answering {} from {} for {}", call_id, peer_id, uuid);
                record_call(registry, &uuid, Some(call_id));
                vec![StreamingEffect::Answer(call_id)]
            },
            None => {
                vec![StreamingEffect::Unclaimed { call_id, peer_id: peer_id.to_string() }]
            },
        }
    }

    /// A call produced its first (or a later) media stream event.
    pub fn on_call_stream(&mut self, call_id: CallId) -> Vec<StreamingEffect> {
        if let Some(uuid) = self.request_for_call(call_id)
            && let Some(request) = self.requests.remove(&uuid)
        {
            return vec![StreamingEffect::Settle {
                op: request.op,
                result: Ok(StreamingOutcome::Started { uuid, call_id }),
            }];
        }

        if let Some(outgoing) = self.outgoing.remove(&call_id) {
            return vec![StreamingEffect::Settle {
                op: outgoing.op,
                result: Ok(StreamingOutcome::Sending { uuid: outgoing.uuid, call_id }),
            }];
        }

        Vec::new()
    }

    /// A call reported an error.
    pub fn on_call_error(
        &mut self,
        registry: &mut DeviceRegistry,
        call_id: CallId,
        reason: &str,
    ) -> Vec<StreamingEffect> {
        let failed = || StreamingError::CallFailed { call_id, reason: reason.to_string() };

        if let Some(op) = self.fail_pending(registry, call_id) {
            return vec![StreamingEffect::Settle { op, result: Err(failed()) }];
        }

        if let Some(stop) = self.stops.remove(&call_id) {
            return vec![StreamingEffect::Settle { op: stop.op, result: Err(failed()) }];
        }

        match registry.uuid_for_call(call_id).map(str::to_string) {
            Some(uuid) => {
                record_call(registry, &uuid, None);
                vec![StreamingEffect::StreamError { uuid, call_id, reason: reason.to_string() }]
            },
            None => Vec::new(),
        }
    }

    /// A call closed.
    pub fn on_call_closed(
        &mut self,
        registry: &mut DeviceRegistry,
        call_id: CallId,
    ) -> Vec<StreamingEffect> {
        if let Some(stop) = self.stops.remove(&call_id) {
            return vec![StreamingEffect::Settle {
                op: stop.op,
                result: Ok(StreamingOutcome::Stopped { uuid: stop.uuid }),
            }];
        }

        if let Some(op) = self.fail_pending(registry, call_id) {
            let error = StreamingError::CallFailed {
                call_id,
                reason: "closed before stream".to_string(),
            };
            return vec![StreamingEffect::Settle { op, result: Err(error) }];
        }

        match registry.uuid_for_call(call_id).map(str::to_string) {
            Some(uuid) => {
                record_call(registry, &uuid, None);
                vec![StreamingEffect::StreamClosed { uuid, call_id }]
            },
            None => Vec::new(),
        }
    }

    /// Time out every exchange whose deadline is `<= now`.
    pub fn expire(&mut self, registry: &mut DeviceRegistry, now: Instant) -> Vec<StreamingEffect> {
        let mut effects = Vec::new();

        let mut expired: Vec<String> = self
            .requests
            .iter()
            .filter(|(_, request)| request.deadline <= now)
            .map(|(uuid, _)| uuid.clone())
            .collect();
        expired.sort();

        for uuid in expired {
            let Some(request) = self.requests.remove(&uuid) else { continue };
            tracing::warn!("{} for {} timed out", REQUEST_STREAMING, uuid);

            if let Some(call_id) = request.call {
                if registry.call(&uuid) == Some(call_id) {
                    record_call(registry, &uuid, None);
                }
                effects.push(StreamingEffect::Close(call_id));
            }
            effects.push(StreamingEffect::Settle {
                op: request.op,
                result: Err(StreamingError::Timeout { operation: REQUEST_STREAMING }),
            });
        }

        for (call_id, stop) in drain_expired(&mut self.stops, now) {
            tracing::warn!("{} for {} timed out on {}", STOP_STREAMING, stop.uuid, call_id);
            effects.push(StreamingEffect::Settle {
                op: stop.op,
                result: Err(StreamingError::Timeout { operation: STOP_STREAMING }),
            });
        }

        for (call_id, outgoing) in drain_expired(&mut self.outgoing, now) {
            tracing::warn!("{} to {} timed out on {}", SEND_STREAM, outgoing.uuid, call_id);
            effects.push(StreamingEffect::Close(call_id));
            effects.push(StreamingEffect::Settle {
                op: outgoing.op,
                result: Err(StreamingError::Timeout { operation: SEND_STREAM }),
            });
        }

        effects
    }

    /// Number of exchanges in flight.
    pub fn in_flight(&self) -> usize {
        self.requests.len() + self.stops.len() + self.outgoing.len()
    }

    fn request_for_call(&self, call_id: CallId) -> Option<String> {
        self.requests
            .iter()
            .find(|(_, request)| request.call == Some(call_id))
            .map(|(uuid, _)| uuid.clone())
    }

    /// Remove a pending request or outgoing call bound to `call_id`,
    /// releasing any call recorded for it.
    fn fail_pending(&mut self, registry: &mut DeviceRegistry, call_id: CallId) -> Option<OperationId> {
        if let Some(uuid) = self.request_for_call(call_id) {
            let request = self.requests.remove(&uuid)?;
            record_call(registry, &uuid, None);
            return Some(request.op);
        }

        self.outgoing.remove(&call_id).map(|outgoing| outgoing.op)
    }
}

/// Record `call` against `uuid`. A device unregistered mid-exchange has no
/// slot left to update.
fn record_call(registry: &mut DeviceRegistry, uuid: &str, call: Option<CallId>) {
    if let Err(e) = registry.set_call(uuid, call) {
        tracing::debug!("Not recording call {:?}: {}", call, e);
    }
}

fn drain_expired(table: &mut HashMap<CallId, PendingCall>, now: Instant) -> Vec<(CallId, PendingCall)> {
    let mut expired: Vec<CallId> =
        table.iter().filter(|(_, pending)| pending.deadline <= now).map(|(id, _)| *id).collect();
    expired.sort();

    expired.into_iter().filter_map(|id| table.remove(&id).map(|pending| (id, pending))).collect()
}
