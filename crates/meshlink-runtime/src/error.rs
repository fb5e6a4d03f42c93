//! Runtime error types.

use meshlink_client::ClientError;
use thiserror::Error;

/// Errors returned by [`crate::ClientHandle`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The client rejected or failed the operation.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The runtime task is no longer running.
    #[error("runtime stopped")]
    Stopped,
}

impl RuntimeError {
    /// Returns true if the underlying client error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Client(err) if err.is_timeout())
    }

    /// The client error, if this is one.
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            Self::Client(err) => Some(err),
            Self::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_pass_through() {
        let err = RuntimeError::from(ClientError::Timeout { operation: "fetch" });
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "fetch timed out");

        assert!(!RuntimeError::Stopped.is_timeout());
        assert_eq!(RuntimeError::Stopped.client_error(), None);
    }
}
