//! Meshlink runtime.
//!
//! Tokio driver for the meshlink client:
//! - System time and OS randomness ([`SystemEnv`])
//! - A [`Transport`] seam for the external connection/signaling layer
//! - [`ClientHandle`] turning deferred completions into awaitable futures
//!
//! ## Architecture
//!
//! ```text
//! meshlink-runtime
//!   ├─ SystemEnv     (production Environment impl)
//!   ├─ Transport     (connect / send / room / calls, provided by the host)
//!   ├─ EventSink     (transport notifications into the runtime)
//!   ├─ Runtime       (owns Client<E>, executes actions, ticks deadlines)
//!   └─ ClientHandle  (async operations, notification broadcast)
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod error;
mod handle;
mod runtime;
mod system_env;
mod transport;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use handle::{ClientHandle, ClientStatus};
pub use runtime::Runtime;
pub use system_env::SystemEnv;
pub use transport::{EventInbox, EventSink, Transport, TransportError, channel};
