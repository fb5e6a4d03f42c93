//! Bootstrap state machine.
//!
//! Startup is a single forward pass. Each phase waits for one external event
//! and has its own deadline:
//!
//! ```text
//! Init ──transport ready──> TransportConnected ──join ack──> RoomJoined
//!      ──member list──> PeerListObtained ──connect devices──> Started
//! ```
//!
//! A missed deadline fails the whole bootstrap. After failure every later
//! event is ignored; the state never moves backwards.

use std::{
    fmt,
    time::{Duration, Instant},
};

use meshlink_proto::{RoomEvent, RoomRequest};

use crate::error::BootstrapError;

/// Lifecycle state of a client. Ordered; only ever increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientState {
    /// Nothing has happened yet.
    Init,
    /// The transport assigned our peer id.
    TransportConnected,
    /// The room acknowledged our join.
    RoomJoined,
    /// The room returned its member list.
    PeerListObtained,
    /// Device connections were initiated; public operations are available.
    Started,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::TransportConnected => "transport connected",
            Self::RoomJoined => "room joined",
            Self::PeerListObtained => "peer list obtained",
            Self::Started => "started",
        };
        f.write_str(name)
    }
}

/// Bootstrap phase waiting on an external event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapPhase {
    /// Waiting for the transport to assign our peer id.
    Transport,
    /// Waiting for the room join acknowledgment.
    RoomJoin,
    /// Waiting for the member list.
    MemberList,
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::RoomJoin => "room join",
            Self::MemberList => "member list",
        };
        f.write_str(name)
    }
}

/// Step requested by the bootstrap machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStep {
    /// The client state advanced.
    Transition(ClientState),
    /// Send a room-level request.
    SendRoom(RoomRequest),
    /// Open a data connection to a device peer.
    ConnectDevice(String),
    /// Bootstrap completed.
    Started,
    /// Bootstrap failed; startup is rejected.
    Failed(BootstrapError),
}

/// Drives the startup sequence.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    state: ClientState,
    room: String,
    device_prefix: String,
    phase_timeout: Duration,
    local_peer_id: Option<String>,
    deadline: Option<Instant>,
    begun: bool,
    failed: bool,
}

impl Bootstrap {
    /// Create an idle bootstrap for `room`.
    pub fn new(room: impl Into<String>, device_prefix: impl Into<String>, phase_timeout: Duration) -> Self {
        Self {
            state: ClientState::Init,
            room: room.into(),
            device_prefix: device_prefix.into(),
            phase_timeout,
            local_peer_id: None,
            deadline: None,
            begun: false,
            failed: false,
        }
    }

    /// Begin the sequence.
    ///
    /// If the transport already reported our peer id, the first phase
    /// completes immediately.
    ///
    /// # Errors
    ///
    /// - `BootstrapError::AlreadyStarted` on a second call
    pub fn start(&mut self, now: Instant) -> Result<Vec<BootstrapStep>, BootstrapError> {
        if self.begun {
            return Err(BootstrapError::AlreadyStarted);
        }
        self.begun = true;
        self.deadline = Some(now + self.phase_timeout);

        tracing::debug!("Bootstrap started for room {}", self.room);

        if self.local_peer_id.is_some() {
            return Ok(self.transport_connected(now));
        }
        Ok(Vec::new())
    }

    /// The transport assigned our peer id.
    pub fn on_transport_ready(&mut self, peer_id: &str, now: Instant) -> Vec<BootstrapStep> {
        if self.failed || self.state != ClientState::Init || self.local_peer_id.is_some() {
            return Vec::new();
        }
        self.local_peer_id = Some(peer_id.to_string());

        if !self.begun {
            return Vec::new();
        }
        self.transport_connected(now)
    }

    fn transport_connected(&mut self, now: Instant) -> Vec<BootstrapStep> {
        self.advance(ClientState::TransportConnected, now);
        vec![
            BootstrapStep::Transition(ClientState::TransportConnected),
            BootstrapStep::SendRoom(RoomRequest::Join { room: self.room.clone() }),
        ]
    }

    /// A room-level event arrived.
    pub fn on_room_event(&mut self, event: &RoomEvent, now: Instant) -> Vec<BootstrapStep> {
        if self.failed || event.room() != self.room {
            return Vec::new();
        }

        match event {
            RoomEvent::JoinAck { peer_id, .. }
                if self.state == ClientState::TransportConnected
                    && self.local_peer_id.as_deref() == Some(peer_id.as_str()) =>
            {
                self.advance(ClientState::RoomJoined, now);
                vec![
                    BootstrapStep::Transition(ClientState::RoomJoined),
                    BootstrapStep::SendRoom(RoomRequest::ListMembers { room: self.room.clone() }),
                ]
            },
            RoomEvent::MemberList { members, .. } if self.state == ClientState::RoomJoined => {
                self.advance(ClientState::PeerListObtained, now);
                let mut steps = vec![BootstrapStep::Transition(ClientState::PeerListObtained)];

                let mut seen = std::collections::HashSet::new();
                for member in members {
                    if self.is_device(member) && seen.insert(member.as_str()) {
                        steps.push(BootstrapStep::ConnectDevice(member.clone()));
                    }
                }

                self.state = ClientState::Started;
                self.deadline = None;
                tracing::debug!("Bootstrap complete, {} device(s) initiated", seen.len());

                steps.push(BootstrapStep::Transition(ClientState::Started));
                steps.push(BootstrapStep::Started);
                steps
            },
            RoomEvent::MemberJoined { peer_id, .. }
                if self.state == ClientState::Started && self.is_device(peer_id) =>
            {
                vec![BootstrapStep::ConnectDevice(peer_id.clone())]
            },
            _ => Vec::new(),
        }
    }

    /// Fail the bootstrap if the current phase's deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<BootstrapStep> {
        let Some(deadline) = self.deadline else {
            return Vec::new();
        };
        if now < deadline {
            return Vec::new();
        }

        let Some(phase) = self.phase() else {
            return Vec::new();
        };

        self.failed = true;
        self.deadline = None;
        tracing::warn!("Bootstrap timed out waiting for {}", phase);

        vec![BootstrapStep::Failed(BootstrapError::Timeout { phase })]
    }

    /// Phase currently waiting, if the bootstrap is running.
    pub fn phase(&self) -> Option<BootstrapPhase> {
        if !self.begun || self.failed {
            return None;
        }
        match self.state {
            ClientState::Init => Some(BootstrapPhase::Transport),
            ClientState::TransportConnected => Some(BootstrapPhase::RoomJoin),
            ClientState::RoomJoined => Some(BootstrapPhase::MemberList),
            ClientState::PeerListObtained | ClientState::Started => None,
        }
    }

    /// Whether `peer_id` follows the device naming convention and is not us.
    pub fn is_device(&self, peer_id: &str) -> bool {
        peer_id.starts_with(&self.device_prefix) && self.local_peer_id.as_deref() != Some(peer_id)
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Our peer id, once the transport assigned it.
    pub fn local_peer_id(&self) -> Option<&str> {
        self.local_peer_id.as_deref()
    }

    /// The room being joined.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether bootstrap completed.
    pub fn is_started(&self) -> bool {
        self.state == ClientState::Started
    }

    /// Whether bootstrap failed.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn advance(&mut self, next: ClientState, now: Instant) {
        debug_assert!(next > self.state);
        tracing::debug!("Client state {} -> {}", self.state, next);
        self.state = next;
        self.deadline = Some(now + self.phase_timeout);
    }
}
