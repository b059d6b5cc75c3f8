//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line from the worker was not valid JSON.
    #[error("malformed line: {reason}")]
    Decode {
        /// Parser diagnostic.
        reason: String,
        /// The offending line, trimmed.
        line: String,
    },

    /// A line parsed as JSON but was not an object.
    #[error("expected a JSON object, got: {line}")]
    NotAnObject {
        /// The offending line, trimmed.
        line: String,
    },

    /// Failed to serialize an outbound command.
    #[error("serialization failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Returns the raw line that caused a decode failure, if any.
    pub fn line(&self) -> Option<&str> {
        match self {
            ProtocolError::Decode { line, .. } | ProtocolError::NotAnObject { line } => Some(line),
            ProtocolError::Encode(_) => None,
        }
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Encode(err.to_string())
    }
}
