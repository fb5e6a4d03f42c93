//! RPC correlator.
//!
//! Each fetch is a small state machine:
//!
//! ```text
//! PENDING ──reply (or last chunk)──> FULFILLED
//!    │
//!    └──────deadline reached───────> TIMED_OUT
//! ```
//!
//! Both terminal transitions start by removing the entry from the pending
//! table. Whichever runs first wins; the other finds nothing and does nothing.
//!
//! Chunk assemblies live exactly as long as their pending request. A stalled
//! assembly is reclaimed only by its request's timeout.

mod assembly;
mod response;

use std::{
    collections::{HashMap, hash_map::Entry},
    time::{Duration, Instant},
};

pub use assembly::ChunkAssembly;
use meshlink_proto::{ChunkFragment, RpcReply, RpcRequest};
pub use response::Response;
use serde_json::{Map, Value};

use crate::{
    error::{AssemblyError, RpcError},
    operation::OperationId,
};

/// Method used when a fetch does not name one.
pub const DEFAULT_METHOD: &str = "GET";

/// Split `<uuid>/<path>` at the first `/`.
///
/// The returned path keeps its leading `/`.
///
/// # Errors
///
/// - `RpcError::InvalidPath` if there is no `/` or the uuid segment is empty
pub fn parse_target(target: &str) -> Result<(&str, String), RpcError> {
    match target.split_once('/') {
        Some((uuid, rest)) if !uuid.is_empty() => Ok((uuid, format!("/{rest}"))),
        _ => Err(RpcError::InvalidPath { path: target.to_string() }),
    }
}

/// Per-call fetch options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Request method. Defaults to [`DEFAULT_METHOD`].
    pub method: Option<String>,
    /// Query parameters.
    pub query: Map<String, Value>,
    /// Request body: string, object or null.
    pub body: Value,
    /// Overrides the configured fetch timeout.
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    /// Set the method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Add one query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = body.into();
        self
    }

    /// Override the timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Effective method.
    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or(DEFAULT_METHOD)
    }
}

/// One outstanding fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Operation to settle.
    pub op: OperationId,
    /// Correlation id sent with the request.
    pub transaction_id: u64,
    /// Target device.
    pub uuid: String,
    /// When the request was sent.
    pub created_at: Instant,
    /// When the request times out.
    pub deadline: Instant,
}

/// What happened to an inbound reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// The reply completed a pending request.
    Settled {
        /// Operation that settled.
        op: OperationId,
        /// The response.
        response: Response,
    },
    /// A fragment was stored; more are needed.
    Buffered {
        /// Correlation id.
        transaction_id: u64,
        /// Filled slots.
        received: usize,
        /// Total slots.
        total: usize,
    },
    /// No pending request has this id (late, duplicate or foreign reply).
    Unmatched {
        /// Correlation id.
        transaction_id: u64,
    },
    /// The fragment was unusable and dropped. The request stays pending.
    Rejected {
        /// Correlation id.
        transaction_id: u64,
        /// Why the fragment was dropped.
        error: AssemblyError,
    },
}

/// Pending-request and chunk-assembly tables.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<u64, PendingRequest>,
    assemblies: HashMap<u64, ChunkAssembly>,
    last_transaction_id: u64,
}

impl Correlator {
    /// Create empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a transaction id from wall-clock milliseconds.
    ///
    /// Ids look like millisecond timestamps but are strictly increasing per
    /// correlator, so two calls in the same millisecond never collide.
    pub fn next_transaction_id(&mut self, wall_clock_millis: u64) -> u64 {
        let id = wall_clock_millis.max(self.last_transaction_id.saturating_add(1));
        self.last_transaction_id = id;
        id
    }

    /// Register a request and return its id with the encoded frame to send.
    ///
    /// The caller has already checked that `uuid` has a connection.
    ///
    /// # Errors
    ///
    /// - `RpcError::Encode` if the request cannot be serialized; nothing is
    ///   registered in that case
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &mut self,
        op: OperationId,
        uuid: &str,
        path: String,
        options: &FetchOptions,
        now: Instant,
        timeout: Duration,
        wall_clock_millis: u64,
    ) -> Result<(u64, String), RpcError> {
        let transaction_id = self.next_transaction_id(wall_clock_millis);

        let request = RpcRequest {
            method: options.method().to_string(),
            path,
            query: options.query.clone(),
            body: options.body.clone(),
            transaction_id,
        };

        let frame = request
            .into_envelope(uuid)
            .and_then(|envelope| envelope.encode())
            .map_err(|err| RpcError::Encode { reason: err.to_string() })?;

        self.pending.insert(
            transaction_id,
            PendingRequest {
                op,
                transaction_id,
                uuid: uuid.to_string(),
                created_at: now,
                deadline: now + timeout,
            },
        );

        tracing::debug!("Fetch {} sent to {} as transaction {}", op, uuid, transaction_id);

        Ok((transaction_id, frame))
    }

    /// Route an inbound reply to its pending request.
    pub fn on_reply(&mut self, reply: RpcReply) -> ReplyOutcome {
        match reply {
            RpcReply::Complete { status, transaction_id, method, body } => {
                let Some(pending) = self.pending.remove(&transaction_id) else {
                    return ReplyOutcome::Unmatched { transaction_id };
                };
                self.assemblies.remove(&transaction_id);

                ReplyOutcome::Settled {
                    op: pending.op,
                    response: Response::new(status, transaction_id, method, body),
                }
            },
            RpcReply::Chunk(fragment) => self.on_fragment(fragment),
        }
    }

    fn on_fragment(&mut self, fragment: ChunkFragment) -> ReplyOutcome {
        let ChunkFragment { status, transaction_id, method, total, index, chunk } = fragment;

        if !self.pending.contains_key(&transaction_id) {
            return ReplyOutcome::Unmatched { transaction_id };
        }

        let assembly = match self.assemblies.entry(transaction_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                match ChunkAssembly::new(transaction_id, status, method, total) {
                    Ok(assembly) => entry.insert(assembly),
                    Err(error) => return ReplyOutcome::Rejected { transaction_id, error },
                }
            },
        };

        match assembly.insert(index, total, chunk) {
            Ok(false) => ReplyOutcome::Buffered {
                transaction_id,
                received: assembly.received(),
                total: assembly.total(),
            },
            Ok(true) => self.finish_assembly(transaction_id),
            Err(error) => ReplyOutcome::Rejected { transaction_id, error },
        }
    }

    fn finish_assembly(&mut self, transaction_id: u64) -> ReplyOutcome {
        let (Some(pending), Some(assembly)) =
            (self.pending.remove(&transaction_id), self.assemblies.remove(&transaction_id))
        else {
            return ReplyOutcome::Unmatched { transaction_id };
        };

        let status = assembly.status();
        let method = assembly.method().map(str::to_string);
        let body = Value::String(assembly.into_body());

        ReplyOutcome::Settled {
            op: pending.op,
            response: Response::new(status, transaction_id, method, body),
        }
    }

    /// Remove and return every request whose deadline is `<= now`, along with
    /// its partial assembly. Ordered by deadline, then transaction id.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingRequest> {
        let expired_ids: Vec<u64> = self
            .pending
            .values()
            .filter(|pending| pending.deadline <= now)
            .map(|pending| pending.transaction_id)
            .collect();

        let mut expired: Vec<PendingRequest> = expired_ids
            .into_iter()
            .filter_map(|transaction_id| {
                if let Some(assembly) = self.assemblies.remove(&transaction_id) {
                    tracing::debug!(
                        "Dropping partial reply for transaction {} ({}/{} chunks)",
                        transaction_id,
                        assembly.received(),
                        assembly.total()
                    );
                }
                self.pending.remove(&transaction_id)
            })
            .collect();

        expired.sort_by_key(|pending| (pending.deadline, pending.transaction_id));
        expired
    }

    /// Whether `transaction_id` is pending.
    pub fn is_pending(&self, transaction_id: u64) -> bool {
        self.pending.contains_key(&transaction_id)
    }

    /// Number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of partial chunk assemblies.
    pub fn assembly_count(&self) -> usize {
        self.assemblies.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use meshlink_proto::{Envelope, Payload};
    use serde_json::json;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn begin(correlator: &mut Correlator, op: u64, now: Instant, wall_ms: u64) -> u64 {
        correlator
            .begin(
                OperationId(op),
                "abc",
                "/led/on".to_string(),
                &FetchOptions::default(),
                now,
                TIMEOUT,
                wall_ms,
            )
            .unwrap()
            .0
    }

    fn fragment(transaction_id: u64, total: usize, index: usize, chunk: &str) -> RpcReply {
        RpcReply::Chunk(ChunkFragment {
            status: Some(200),
            transaction_id,
            method: Some("GET".to_string()),
            total,
            index,
            chunk: chunk.to_string(),
        })
    }

    #[test]
    fn parse_target_splits_at_first_slash() {
        assert_eq!(parse_target("abc/led/on").unwrap(), ("abc", "/led/on".to_string()));
        assert_eq!(parse_target("abc/").unwrap(), ("abc", "/".to_string()));
        assert!(matches!(parse_target("abc"), Err(RpcError::InvalidPath { .. })));
        assert!(matches!(parse_target("/led"), Err(RpcError::InvalidPath { .. })));
    }

    #[test]
    fn transaction_ids_are_strictly_increasing() {
        let mut correlator = Correlator::new();
        assert_eq!(correlator.next_transaction_id(1_000), 1_000);
        assert_eq!(correlator.next_transaction_id(1_000), 1_001);
        assert_eq!(correlator.next_transaction_id(999), 1_002);
        assert_eq!(correlator.next_transaction_id(5_000), 5_000);
    }

    #[test]
    fn begin_encodes_request_envelope() {
        let mut correlator = Correlator::new();
        let options = FetchOptions::default().with_method("PUT").with_body("on");

        let (transaction_id, frame) = correlator
            .begin(
                OperationId(1),
                "abc",
                "/led".to_string(),
                &options,
                Instant::now(),
                TIMEOUT,
                42,
            )
            .unwrap();

        assert_eq!(transaction_id, 42);
        let envelope = Envelope::decode(&frame).unwrap();
        assert_eq!(envelope.topic, "abc");
        assert_eq!(
            envelope.payload,
            Payload::Structured(json!({
                "method": "PUT", "path": "/led", "query": {}, "body": "on", "transaction_id": 42
            }))
        );
        assert!(correlator.is_pending(42));
    }

    #[test]
    fn single_frame_reply_settles_once() {
        let mut correlator = Correlator::new();
        let now = Instant::now();
        let transaction_id = begin(&mut correlator, 1, now, 10);

        let reply = RpcReply::Complete {
            status: Some(200),
            transaction_id,
            method: Some("PUT".to_string()),
            body: json!("OK"),
        };

        let ReplyOutcome::Settled { op, response } = correlator.on_reply(reply.clone()) else {
            panic!("expected settlement");
        };
        assert_eq!(op, OperationId(1));
        assert_eq!(response.text(), "OK");
        assert_eq!(response.transaction_id(), transaction_id);

        assert_eq!(correlator.on_reply(reply), ReplyOutcome::Unmatched { transaction_id });
        assert!(correlator.expire(now + TIMEOUT).is_empty());
    }

    #[test]
    fn chunked_reply_settles_when_all_slots_fill() {
        let mut correlator = Correlator::new();
        let transaction_id = begin(&mut correlator, 1, Instant::now(), 10);

        assert_eq!(
            correlator.on_reply(fragment(transaction_id, 3, 2, "c")),
            ReplyOutcome::Buffered { transaction_id, received: 1, total: 3 }
        );
        assert!(matches!(
            correlator.on_reply(fragment(transaction_id, 3, 0, "a")),
            ReplyOutcome::Buffered { received: 2, .. }
        ));

        let ReplyOutcome::Settled { response, .. } =
            correlator.on_reply(fragment(transaction_id, 3, 1, "b"))
        else {
            panic!("expected settlement");
        };
        assert_eq!(response.text(), "abc");
        assert_eq!(response.status(), Some(200));
        assert_eq!(correlator.assembly_count(), 0);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn bad_fragment_keeps_request_pending() {
        let mut correlator = Correlator::new();
        let transaction_id = begin(&mut correlator, 1, Instant::now(), 10);

        assert!(matches!(
            correlator.on_reply(fragment(transaction_id, 0, 0, "x")),
            ReplyOutcome::Rejected { error: AssemblyError::Empty { .. }, .. }
        ));
        assert!(matches!(
            correlator.on_reply(fragment(transaction_id, 2, 5, "x")),
            ReplyOutcome::Rejected { error: AssemblyError::IndexOutOfRange { .. }, .. }
        ));
        assert!(correlator.is_pending(transaction_id));
    }

    #[test]
    fn fragment_for_unknown_transaction_creates_nothing() {
        let mut correlator = Correlator::new();
        assert_eq!(
            correlator.on_reply(fragment(99, 2, 0, "a")),
            ReplyOutcome::Unmatched { transaction_id: 99 }
        );
        assert_eq!(correlator.assembly_count(), 0);
    }

    #[test]
    fn timeout_reclaims_partial_assembly() {
        let mut correlator = Correlator::new();
        let now = Instant::now();
        let transaction_id = begin(&mut correlator, 1, now, 10);
        correlator.on_reply(fragment(transaction_id, 3, 0, "a"));

        assert!(correlator.expire(now + TIMEOUT - Duration::from_millis(1)).is_empty());

        let expired = correlator.expire(now + TIMEOUT);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].op, OperationId(1));
        assert_eq!(correlator.assembly_count(), 0);

        assert_eq!(
            correlator.on_reply(fragment(transaction_id, 3, 1, "b")),
            ReplyOutcome::Unmatched { transaction_id }
        );
    }

    #[test]
    fn per_call_timeout_override() {
        let mut correlator = Correlator::new();
        let now = Instant::now();
        let options = FetchOptions::default().with_timeout(Duration::from_millis(100));
        let timeout = options.timeout.unwrap_or(TIMEOUT);

        correlator
            .begin(OperationId(1), "abc", "/x".to_string(), &options, now, timeout, 1)
            .unwrap();

        assert_eq!(correlator.expire(now + Duration::from_millis(100)).len(), 1);
    }
}
