//! # HU Arena Protocol Library
//!
//! Wire types shared by everything that talks to a match worker.
//!
//! ## Overview
//!
//! A match worker is a child process that plays heads-up postflop hands
//! against a human. The server drives it over its standard streams:
//!
//! - **Control Commands**: `start_match`, `human_action`, `next_hand`
//! - **Worker Events**: `match_started`, `hand_start`, `state`, `action`,
//!   `hand_end`, `await_next_hand`, `match_end`, `error`, and anything else
//!   the worker chooses to emit
//! - **Synthetic Events**: `connected`, `error` and `match_end` events the
//!   server adds to viewer streams
//! - **Line Codec**: one JSON object per line in both directions
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  start_match / human_action / next_hand  ┌──────────┐
//! │               │ ───────────────────────────────────────▶ │          │
//! │    Server     │              stdin (JSON lines)          │  Worker  │
//! │               │ ◀─────────────────────────────────────── │          │
//! └───────────────┘   stdout (JSON lines) + stderr (text)    └──────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{encode_command, ControlCommand, LineDecoder, MatchSettings};
//!
//! let line = encode_command(&ControlCommand::StartMatch(MatchSettings::default())).unwrap();
//! assert!(line.ends_with(b"\n"));
//!
//! let mut decoder = LineDecoder::new();
//! decoder.push(b"{\"type\":\"match_started\",\"human\":\"hero\"}\n");
//! let event = decoder.next_event().unwrap().unwrap();
//! assert_eq!(event.event_type(), Some("match_started"));
//! ```
//!
//! ## Modules
//!
//! - [`commands`]: Outbound control commands and match settings
//! - [`events`]: Inbound event classification and synthetic events
//! - [`codec`]: Line encoder and streaming decoder
//! - [`error`]: Error types

pub mod codec;
pub mod commands;
pub mod error;
pub mod events;

pub use codec::{decode_bytes, decode_line, encode_command, LineDecoder, LINE_DELIMITER};
pub use commands::{ControlCommand, MatchSettings, Seat};
pub use error::{ProtocolError, Result};
pub use events::{
    action_name, ActionCode, EndReason, ErrorSource, EventKind, HandEnd, HandStart,
    PlayerAction, ProtocolEvent, SyntheticEvent,
};
