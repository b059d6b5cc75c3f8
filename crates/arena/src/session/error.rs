//! Errors surfaced synchronously to callers of session operations.
//!
//! Faults inside a running session (malformed worker output, stderr
//! diagnostics, the worker exiting) are not errors here: they become events
//! on the session's viewer stream.

use thiserror::Error;

use super::SessionId;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The player identity is empty once sanitized.
    #[error("invalid player identity: {0:?}")]
    InvalidIdentity(String),

    /// No session with this id is registered.
    #[error("session not found: {0}")]
    UnknownSession(SessionId),

    /// The configured session limit has been reached.
    #[error("session limit reached ({0} active)")]
    CapacityReached(usize),

    /// Failed to launch the worker process.
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    /// Failed to write a command to the worker.
    #[error("failed to write to worker: {0}")]
    WriteFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<protocol::ProtocolError> for SessionError {
    fn from(err: protocol::ProtocolError) -> Self {
        SessionError::WriteFailed(err.to_string())
    }
}
