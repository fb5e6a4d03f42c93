//! Meshlink Client
//!
//! Action-based client state machine for the meshlink protocol. Layers a
//! pub/sub bus, correlated RPC and streaming control over a mesh of
//! point-to-point device connections owned by an external transport.
//!
//! # Architecture
//!
//! The client is a pure state machine that:
//! - Receives events from the caller (transport notifications, room
//!   signaling, ticks, application operations)
//! - Produces actions for the caller to execute (connect, send frames, answer
//!   calls, complete deferred operations, notify the application)
//! - Uses the `Environment` trait for time and randomness (deterministic
//!   testing)
//!
//! # Components
//!
//! - [`Client`]: Orchestrator owning the registry, subscriptions, correlator
//!   and streaming control
//! - [`ClientConfig`]: Room, device naming and timeouts
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod config;
mod error;
mod event;

pub use client::Client;
pub use config::ClientConfig;
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, Completion, Notification};
pub use meshlink_core::{
    ClientState, Environment, FetchOptions, OperationId, Response, StreamingOutcome,
};
pub use meshlink_proto::{
    CallId, CallOptions, DeviceProfile, FrameData, Payload, RoomEvent, RoomRequest, StreamHandle,
};
