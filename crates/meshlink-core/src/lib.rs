//! Meshlink protocol core logic
//!
//! Pure state machines for the meshlink client. Nothing in this crate performs
//! I/O: every component consumes events and returns what the caller should do
//! next.
//!
//! # Architecture
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ meshlink-core                │
//!      │ - bootstrap state machine    │
//!      │ - device registry            │
//!      │ - topic matcher / codec      │
//!      │ - RPC correlator             │
//!      │ - streaming control          │
//!      └──────────────────────────────┘
//!                     ↓
//!      ┌──────────────────────────────┐
//!      │ meshlink-client (Client<E>)  │
//!      └──────────────────────────────┘
//!         ↓                      ↓
//! ┌──────────────────┐  ┌──────────────────┐
//! │ meshlink-harness │  │ meshlink-runtime │
//! │ - virtual clock  │  │ - tokio driver   │
//! │ - sim devices    │  │ - system clock   │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in core: time comes from the caller or the [`env::Environment`]
//! - Timeouts are deadlines checked on tick; whichever of {reply, expiry} is
//!   processed first removes the pending entry, so nothing settles twice
//! - Tables are owned by one client instance and mutated from one event loop
//!
//! # Modules
//!
//! - [`bootstrap`]: Forward-only startup sequence
//! - [`codec`]: Inbound frame classification
//! - [`env`]: Environment abstraction (time, RNG)
//! - [`keepalive`]: Per-connection keepalive schedule
//! - [`registry`]: Known devices and profile handshakes
//! - [`rpc`]: Transaction correlation and chunk reassembly
//! - [`streaming`]: Media streaming control handshake
//! - [`topic`]: Topic filters and the subscription set

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bootstrap;
pub mod codec;
pub mod env;
pub mod error;
pub mod keepalive;
pub mod operation;
pub mod registry;
pub mod rpc;
pub mod streaming;
pub mod topic;

pub use bootstrap::{Bootstrap, BootstrapPhase, BootstrapStep, ClientState};
pub use codec::{Inbound, Unrecognized};
pub use env::Environment;
pub use error::{AssemblyError, BootstrapError, RegistryError, RpcError, StreamingError};
pub use keepalive::KeepaliveSchedule;
pub use operation::OperationId;
pub use registry::{Device, DeviceRegistry, Registration};
pub use rpc::{Correlator, FetchOptions, PendingRequest, ReplyOutcome, Response};
pub use streaming::{StreamingControl, StreamingEffect, StreamingOutcome};
pub use topic::SubscriptionSet;
