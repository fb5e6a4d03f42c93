//! Tokio driver for the client state machine.
//!
//! The runtime owns one [`Client`] and is the only task that touches it.
//! Operations arrive over a command channel from [`ClientHandle`]s, transport
//! notifications over the [`EventInbox`], and a periodic tick expires
//! deadlines. Actions returned by the client are executed against the
//! [`Transport`]; transport failures are fed back as events.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use meshlink_client::{
    Client, ClientAction, ClientError, ClientEvent, Completion, Environment, Notification,
    OperationId, Response, StreamingOutcome,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::MissedTickBehavior,
};

use crate::{
    config::RuntimeConfig,
    handle::{ClientHandle, ClientStatus},
    system_env::SystemEnv,
    transport::{EventInbox, Transport},
};

/// Request from a handle to the runtime task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Feed an operation event to the client.
    Apply {
        /// The operation.
        event: ClientEvent,
        /// Where the result goes.
        reply: Reply,
    },
    /// Report the client's state.
    Status(oneshot::Sender<ClientStatus>),
    /// Stop the runtime.
    Shutdown,
}

/// How an operation's result is delivered.
#[derive(Debug)]
pub(crate) enum Reply {
    /// Synchronous operation; resolves as soon as the client accepts it.
    Ack(oneshot::Sender<Result<(), ClientError>>),
    /// Bootstrap; resolves on `Connected` or `StartFailed`.
    Start(oneshot::Sender<Result<String, ClientError>>),
    /// Fetch; resolves on the matching completion.
    Fetch(OperationId, oneshot::Sender<Result<Response, ClientError>>),
    /// Streaming operation; resolves on the matching completion.
    Streaming(OperationId, oneshot::Sender<Result<StreamingOutcome, ClientError>>),
}

impl Reply {
    fn reject(self, error: ClientError) {
        // A dropped receiver means the caller stopped waiting.
        match self {
            Self::Ack(tx) => {
                let _ = tx.send(Err(error));
            },
            Self::Start(tx) => {
                let _ = tx.send(Err(error));
            },
            Self::Fetch(_, tx) => {
                let _ = tx.send(Err(error));
            },
            Self::Streaming(_, tx) => {
                let _ = tx.send(Err(error));
            },
        }
    }
}

/// Caller waiting on a deferred operation.
#[derive(Debug)]
enum Waiter {
    Fetch(oneshot::Sender<Result<Response, ClientError>>),
    Streaming(oneshot::Sender<Result<StreamingOutcome, ClientError>>),
}

/// Tokio driver for one client instance.
///
/// # Example
///
/// ```rust,ignore
/// let (sink, inbox) = meshlink_runtime::channel();
/// let transport = Arc::new(MyTransport::new(sink));
/// let (runtime, handle) = Runtime::new(transport, inbox, RuntimeConfig::default());
/// tokio::spawn(runtime.run());
///
/// let peer_id = handle.start().await?;
/// let response = handle.fetch("abc/led/on", FetchOptions::default()).await?;
/// ```
pub struct Runtime<T: Transport, E: Environment = SystemEnv> {
    client: Client<E>,
    transport: Arc<T>,
    env: E,
    config: RuntimeConfig,

    commands: mpsc::Receiver<Command>,
    inbox: EventInbox,
    notifications: broadcast::Sender<Notification>,

    /// Events produced while executing actions, processed before the next
    /// external input.
    queue: VecDeque<ClientEvent>,
    waiters: HashMap<OperationId, Waiter>,
    start_waiter: Option<oneshot::Sender<Result<String, ClientError>>>,
}

impl<T: Transport> Runtime<T> {
    /// Create a runtime on the system clock.
    pub fn new(
        transport: Arc<T>,
        inbox: EventInbox,
        config: RuntimeConfig,
    ) -> (Self, ClientHandle) {
        Self::with_env(SystemEnv::new(), transport, inbox, config)
    }
}

impl<T: Transport, E: Environment> Runtime<T, E> {
    /// Create a runtime on a custom environment.
    pub fn with_env(
        env: E,
        transport: Arc<T>,
        inbox: EventInbox,
        config: RuntimeConfig,
    ) -> (Self, ClientHandle) {
        let (command_tx, commands) = mpsc::channel(config.command_capacity.max(1));
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        let handle = ClientHandle::new(command_tx, notifications.clone());

        let runtime = Self {
            client: Client::new(env.clone(), config.client.clone()),
            transport,
            env,
            config,
            commands,
            inbox,
            notifications,
            queue: VecDeque::new(),
            waiters: HashMap::new(),
            start_waiter: None,
        };

        (runtime, handle)
    }

    /// Drive the client until shut down or every handle is dropped.
    ///
    /// Outstanding operations resolve with `RuntimeError::Stopped` when this
    /// returns.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbox_open = true;

        tracing::info!("Runtime started for room {}", self.config.client.room);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Apply { event, reply }) => self.apply(event, reply).await,
                    Some(Command::Status(tx)) => {
                        let _ = tx.send(self.status());
                    },
                    Some(Command::Shutdown) | None => break,
                },
                event = self.inbox.recv(), if inbox_open => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        tracing::warn!("Transport event channel closed");
                        inbox_open = false;
                    },
                },
                _ = ticker.tick() => {
                    let now = self.env.now();
                    self.dispatch(ClientEvent::Tick { now }).await;
                },
            }
        }

        tracing::info!("Runtime stopped ({} operation(s) abandoned)", self.waiters.len());
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            state: self.client.state(),
            local_peer_id: self.client.local_peer_id().map(str::to_string),
            devices: self.client.devices().map(|device| device.profile().clone()).collect(),
        }
    }

    /// Feed an operation to the client and arrange delivery of its result.
    async fn apply(&mut self, event: ClientEvent, reply: Reply) {
        let actions = match self.client.handle(event) {
            Ok(actions) => actions,
            Err(error) => {
                tracing::debug!("Operation rejected: {}", error);
                reply.reject(error);
                return;
            },
        };

        match reply {
            Reply::Ack(tx) => {
                let _ = tx.send(Ok(()));
            },
            Reply::Start(tx) => self.start_waiter = Some(tx),
            Reply::Fetch(op, tx) => {
                self.waiters.insert(op, Waiter::Fetch(tx));
            },
            Reply::Streaming(op, tx) => {
                self.waiters.insert(op, Waiter::Streaming(tx));
            },
        }

        self.execute_all(actions).await;
        self.drain().await;
    }

    /// Feed a transport event (and everything it causes) to the client.
    async fn dispatch(&mut self, event: ClientEvent) {
        self.queue.push_back(event);
        self.drain().await;
    }

    async fn drain(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            match self.client.handle(event) {
                Ok(actions) => self.execute_all(actions).await,
                Err(error) => tracing::warn!("Event rejected: {}", error),
            }
        }
    }

    async fn execute_all(&mut self, actions: Vec<ClientAction>) {
        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: ClientAction) {
        match action {
            ClientAction::Connect { peer_id } => {
                if let Err(e) = self.transport.connect(&peer_id).await {
                    tracing::warn!("Connect to {} failed: {}", peer_id, e);
                    self.queue.push_back(ClientEvent::ConnectionError {
                        peer_id: peer_id.clone(),
                        reason: e.reason,
                    });
                    self.queue.push_back(ClientEvent::ConnectionClosed { peer_id });
                }
            },
            ClientAction::Send { peer_id, frame } => {
                if let Err(e) = self.transport.send(&peer_id, &frame).await {
                    self.queue.push_back(ClientEvent::ConnectionError { peer_id, reason: e.reason });
                }
            },
            ClientAction::Room(request) => {
                if let Err(e) = self.transport.room(&request).await {
                    tracing::warn!("Room request {:?} failed: {}", request, e);
                }
            },
            ClientAction::AnswerCall { call_id } => {
                if let Err(e) = self.transport.answer_call(call_id).await {
                    self.queue.push_back(ClientEvent::CallError { call_id, reason: e.reason });
                }
            },
            ClientAction::CloseCall { call_id } => {
                if let Err(e) = self.transport.close_call(call_id).await {
                    tracing::warn!("Closing {} failed: {}", call_id, e);
                }
            },
            ClientAction::PlaceCall { call_id, peer_id, stream, options } => {
                if let Err(e) = self.transport.place_call(call_id, &peer_id, stream, &options).await
                {
                    self.queue.push_back(ClientEvent::CallError { call_id, reason: e.reason });
                }
            },
            ClientAction::Complete { op, completion } => self.complete(op, completion),
            ClientAction::Notify(notification) => self.notify(notification),
        }
    }

    fn complete(&mut self, op: OperationId, completion: Completion) {
        let Some(waiter) = self.waiters.remove(&op) else {
            tracing::debug!("No caller waiting for {}", op);
            return;
        };

        match (waiter, completion) {
            (Waiter::Fetch(tx), Completion::Fetch(result)) => {
                let _ = tx.send(result);
            },
            (Waiter::Streaming(tx), Completion::Streaming(result)) => {
                let _ = tx.send(result);
            },
            (_, completion) => {
                tracing::warn!("Mismatched completion for {}: {:?}", op, completion);
            },
        }
    }

    fn notify(&mut self, notification: Notification) {
        match &notification {
            Notification::Connected { peer_id } => {
                if let Some(tx) = self.start_waiter.take() {
                    let _ = tx.send(Ok(peer_id.clone()));
                }
            },
            Notification::StartFailed { error } => {
                if let Some(tx) = self.start_waiter.take() {
                    let _ = tx.send(Err(error.clone()));
                }
            },
            _ => {},
        }

        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }
}
