//! # HU Arena Server Library
//!
//! This crate runs heads-up matches between a human player and the agent.
//! Each match is played by a dedicated worker process; the server drives
//! workers over newline-delimited JSON, streams their events to browser
//! viewers, and keeps a per-player history of completed hands.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Arena Orchestrator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                HTTP API  +  SSE event streams              │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │   Session    │  │    Session       │  │    Hand Log      │  │
//! │  │   Registry   │  │    Supervisor    │  │    Store         │  │
//! │  └──────────────┘  └────────┬─────────┘  └────────▲─────────┘  │
//! │                             │ one task per worker  │            │
//! │                    ┌────────▼─────────┐            │            │
//! │                    │ Session Pipeline ├────────────┘            │
//! │                    │ decode → log →   │──► Broadcast Hub ──► viewers
//! │                    └──────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arena::{ArenaOrchestrator, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let mut orchestrator = ArenaOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Serving until a shutdown signal...
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`identity`]: Player identity sanitization
//! - [`session`]: Worker supervision, viewer fan-out, session registry
//! - [`hand_log`]: Hand assembly and per-player log files
//! - [`http`]: REST API and SSE event streams
//! - [`orchestrator`]: Main server coordinator

pub mod config;
pub mod hand_log;
pub mod http;
pub mod identity;
pub mod orchestrator;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{BroadcastHub, Session, SessionError, SessionId, SessionRegistry, Supervisor};

// Re-export hand log types for convenience
pub use hand_log::{HandAssembler, HandLogStore, HandRecord};
pub use identity::PlayerId;

// Re-export orchestrator types for convenience
pub use orchestrator::{ArenaOrchestrator, OrchestratorEvent, OrchestratorState};
