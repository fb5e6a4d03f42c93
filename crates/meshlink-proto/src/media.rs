//! Media session handles.
//!
//! Media calls are negotiated and carried by the transport. The protocol only
//! refers to them through opaque handles.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of one media call.
///
/// Inbound calls are numbered by the transport; outbound calls are numbered by
/// the client when it places them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{:016x}", self.0)
    }
}

/// Handle to a locally captured media stream owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle(pub u64);

/// Options forwarded to the transport when originating a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Opaque metadata attached to the call offer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}
