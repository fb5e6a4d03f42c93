//! Meshlink Protocol
//!
//! Wire types exchanged between a meshlink client and the devices it reaches
//! over point-to-point data channels.
//!
//! Every data-channel frame is text. It is either a control frame (a plain
//! string starting with [`CONTROL_PREFIX`]) or a JSON [`Envelope`]
//! `{topic, payload}`. Envelopes carry pub/sub messages as well as RPC
//! requests and replies.
//!
//! # Components
//!
//! - [`ControlFrame`]: handshake, keepalive and streaming signaling
//! - [`Envelope`] / [`Payload`]: pub/sub and RPC wrapper
//! - [`RpcRequest`] / [`RpcReply`]: correlated request/response payloads
//! - [`DeviceProfile`]: metadata returned by the profile handshake
//! - [`RoomRequest`] / [`RoomEvent`]: mesh room signaling
//! - [`CallId`], [`StreamHandle`], [`CallOptions`]: media session handles

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod control;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod media;
pub mod profile;
pub mod room;
pub mod rpc;

pub use control::{CONTROL_PREFIX, ControlFrame, DEVICE_PREFIX};
pub use envelope::{Envelope, Payload};
pub use error::ProtoError;
pub use frame::FrameData;
pub use media::{CallId, CallOptions, StreamHandle};
pub use profile::DeviceProfile;
pub use room::{RoomEvent, RoomRequest};
pub use rpc::{ChunkFragment, RpcReply, RpcRequest};
