//! Mesh room signaling.
//!
//! Room membership is carried by the transport's signaling channel. These
//! types describe the messages the client sends and the notifications it
//! consumes; how they are framed on the signaling channel is up to the
//! transport.

use serde::{Deserialize, Serialize};

/// Room-level request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomRequest {
    /// Join a room.
    Join {
        /// Room name.
        room: String,
    },
    /// Ask for the current member list of a room.
    ListMembers {
        /// Room name.
        room: String,
    },
}

/// Room-level notification received by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A peer joined `room`. When `peer_id` is our own id this acknowledges
    /// our join request.
    JoinAck {
        /// Room name.
        room: String,
        /// Peer the acknowledgment is addressed to.
        peer_id: String,
    },
    /// Reply to [`RoomRequest::ListMembers`].
    MemberList {
        /// Room name.
        room: String,
        /// Peer ids currently in the room.
        members: Vec<String>,
    },
    /// Another peer joined the room.
    MemberJoined {
        /// Room name.
        room: String,
        /// Peer that joined.
        peer_id: String,
    },
    /// A peer left the room.
    MemberLeft {
        /// Room name.
        room: String,
        /// Peer that left.
        peer_id: String,
    },
}

impl RoomEvent {
    /// Room the event refers to.
    pub fn room(&self) -> &str {
        match self {
            Self::JoinAck { room, .. }
            | Self::MemberList { room, .. }
            | Self::MemberJoined { room, .. }
            | Self::MemberLeft { room, .. } => room,
        }
    }
}
