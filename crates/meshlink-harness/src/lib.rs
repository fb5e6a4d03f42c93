//! Deterministic simulation harness for the meshlink client.
//!
//! Runs a real [`meshlink_client::Client`] against a simulated room and
//! scripted devices on a virtual clock, so timeout races and chunk orderings
//! replay identically from a seed.
//!
//! # Components
//!
//! - [`SimEnv`]: virtual clock and seeded RNG
//! - [`SimDevice`]: scripted device (handshake, RPC routes, streaming)
//! - [`SimWorld`]: plays transport and room for one client
//! - [`Operation`]: arbitrary steps for property tests and fuzzing

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod operation;
pub mod sim_device;
pub mod sim_env;
pub mod world;

pub use operation::{Operation, standard_device, standard_world};
pub use sim_device::{ChunkOrder, Delivery, DeviceOutput, Route, SimDevice, StreamingBehavior};
pub use sim_env::SimEnv;
pub use world::{LOCAL_PEER_ID, SimWorld};
