//! Caller-chosen operation identifiers.

use std::fmt;

/// Identifies one deferred operation (fetch, streaming start/stop, send
/// stream).
///
/// Chosen by the caller when the operation is issued and echoed back when the
/// operation settles, so the caller can route the result to whoever is
/// waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}
