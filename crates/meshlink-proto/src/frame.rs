//! Raw data-channel frame contents.

use bytes::Bytes;

use crate::error::ProtoError;

/// Payload of a single data-channel `data` event.
///
/// The transport may deliver either text or binary. The protocol itself is
/// textual; binary frames must contain UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameData {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl FrameData {
    /// Borrow the frame as text.
    pub fn as_text(&self) -> Result<&str, ProtoError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(bytes) => std::str::from_utf8(bytes).map_err(|_| ProtoError::NotUtf8),
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for FrameData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for FrameData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for FrameData {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}
