//! Session management module.
//!
//! A session is one match between a player and the agent, played by a
//! dedicated worker process. This module spawns and supervises workers,
//! turns their output into viewer events and hand log records, and keeps
//! the registry of live sessions.

pub mod error;
pub mod hub;
pub mod pipeline;
pub mod registry;
pub mod supervisor;

/// Unique identifier for a session.
pub type SessionId = String;

pub use error::SessionError;
pub use hub::{BroadcastHub, EventPayload, Viewer, ViewerId, DEFAULT_VIEWER_BUFFER};
pub use pipeline::SessionPipeline;
pub use registry::{Session, SessionInfo, SessionRegistry, WorkerInput};
pub use supervisor::Supervisor;
