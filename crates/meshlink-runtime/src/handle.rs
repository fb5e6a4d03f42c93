//! Async handle to a running client.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use meshlink_client::{
    CallOptions, ClientEvent, ClientState, DeviceProfile, FetchOptions, Notification, OperationId,
    Response, StreamHandle, StreamingOutcome,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    error::RuntimeError,
    runtime::{Command, Reply},
};

/// Snapshot of the client's state.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    /// Lifecycle state.
    pub state: ClientState,
    /// Our peer id, once assigned.
    pub local_peer_id: Option<String>,
    /// Registered devices in registration order.
    pub devices: Vec<DeviceProfile>,
}

/// Cloneable handle for issuing operations to a [`crate::Runtime`].
///
/// Every deferred operation resolves exactly once: with the device's reply,
/// with the client's error, or with [`RuntimeError::Stopped`] if the runtime
/// goes away first.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    notifications: broadcast::Sender<Notification>,
    next_op: Arc<AtomicU64>,
}

impl ClientHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Self { commands, notifications, next_op: Arc::new(AtomicU64::new(1)) }
    }

    /// Receive every notification emitted from now on.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Bootstrap the client. Resolves with our peer id once the client is
    /// started.
    ///
    /// # Errors
    ///
    /// - `ClientError::Bootstrap` if a phase times out or start was already
    ///   called
    pub async fn start(&self) -> Result<String, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.submit(ClientEvent::Start, Reply::Start(tx)).await?;
        Ok(rx.await.map_err(|_| RuntimeError::Stopped)??)
    }

    /// Publish `payload` on `topic` to every registered device.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Value>,
    ) -> Result<(), RuntimeError> {
        self.apply(ClientEvent::Publish { topic: topic.into(), payload: payload.into() }).await
    }

    /// Add a subscription filter.
    pub async fn subscribe(&self, topic: impl Into<String>) -> Result<(), RuntimeError> {
        self.apply(ClientEvent::Subscribe { topic: topic.into() }).await
    }

    /// Remove a subscription filter.
    pub async fn unsubscribe(&self, topic: impl Into<String>) -> Result<(), RuntimeError> {
        self.apply(ClientEvent::Unsubscribe { topic: topic.into() }).await
    }

    /// Send an RPC request to `<uuid>/<path>` and wait for the reply.
    pub async fn fetch(
        &self,
        target: impl Into<String>,
        options: FetchOptions,
    ) -> Result<Response, RuntimeError> {
        let op = self.next_op();
        let (tx, rx) = oneshot::channel();
        self.submit(ClientEvent::Fetch { op, target: target.into(), options }, Reply::Fetch(op, tx))
            .await?;
        Ok(rx.await.map_err(|_| RuntimeError::Stopped)??)
    }

    /// Ask device `uuid` to stream to us.
    pub async fn request_streaming(
        &self,
        uuid: impl Into<String>,
    ) -> Result<StreamingOutcome, RuntimeError> {
        let op = self.next_op();
        self.streaming(op, ClientEvent::RequestStreaming { op, uuid: uuid.into() }).await
    }

    /// Stop device `uuid`'s stream.
    pub async fn stop_streaming(
        &self,
        uuid: impl Into<String>,
    ) -> Result<StreamingOutcome, RuntimeError> {
        let op = self.next_op();
        self.streaming(op, ClientEvent::StopStreaming { op, uuid: uuid.into() }).await
    }

    /// Stream local media to device `uuid`.
    pub async fn send_stream(
        &self,
        uuid: impl Into<String>,
        stream: StreamHandle,
        options: CallOptions,
    ) -> Result<StreamingOutcome, RuntimeError> {
        let op = self.next_op();
        self.streaming(op, ClientEvent::SendStream { op, uuid: uuid.into(), stream, options })
            .await
    }

    /// Current client state and registered devices.
    pub async fn status(&self) -> Result<ClientStatus, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Status(tx)).await.map_err(|_| RuntimeError::Stopped)?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    /// Stop the runtime. Pending operations resolve with
    /// [`RuntimeError::Stopped`].
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn streaming(
        &self,
        op: OperationId,
        event: ClientEvent,
    ) -> Result<StreamingOutcome, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.submit(event, Reply::Streaming(op, tx)).await?;
        Ok(rx.await.map_err(|_| RuntimeError::Stopped)??)
    }

    async fn apply(&self, event: ClientEvent) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.submit(event, Reply::Ack(tx)).await?;
        Ok(rx.await.map_err(|_| RuntimeError::Stopped)??)
    }

    async fn submit(&self, event: ClientEvent, reply: Reply) -> Result<(), RuntimeError> {
        self.commands.send(Command::Apply { event, reply }).await.map_err(|_| RuntimeError::Stopped)
    }

    fn next_op(&self) -> OperationId {
        OperationId(self.next_op.fetch_add(1, Ordering::Relaxed))
    }
}
