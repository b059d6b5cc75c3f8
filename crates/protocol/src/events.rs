//! Events emitted by the match worker, plus the synthetic events the server
//! injects into viewer streams.
//!
//! Inbound events are kept as the raw JSON object they arrived as, so that
//! viewers always receive exactly what the worker wrote. The few event types
//! the hand log needs are additionally parsed into typed structs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::commands::Seat;

/// Action codes used by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionCode {
    Fold = 0,
    Check = 1,
    Call = 2,
    BetHalfPot = 3,
    Raise3x = 4,
    AllIn = 5,
}

impl ActionCode {
    /// Maps a raw code to a known action.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ActionCode::Fold),
            1 => Some(ActionCode::Check),
            2 => Some(ActionCode::Call),
            3 => Some(ActionCode::BetHalfPot),
            4 => Some(ActionCode::Raise3x),
            5 => Some(ActionCode::AllIn),
            _ => None,
        }
    }

    /// The worker's display name for this action.
    pub fn name(self) -> &'static str {
        match self {
            ActionCode::Fold => "FOLD",
            ActionCode::Check => "CHECK",
            ActionCode::Call => "CALL",
            ActionCode::BetHalfPot => "BET_HALF_POT",
            ActionCode::Raise3x => "RAISE_3X",
            ActionCode::AllIn => "ALLIN",
        }
    }
}

/// Display name for any action code, falling back to its decimal text.
pub fn action_name(code: u8) -> String {
    ActionCode::from_code(code)
        .map(|a| a.name().to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Header fields of a `hand_start` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandStart {
    pub hand_num: u32,
    pub human: Seat,
    pub hero_is_ip: bool,
    /// Stacks after the initial pot has been posted.
    pub hero_stack: i64,
    pub vill_stack: i64,
    #[serde(default)]
    pub flop: String,
    #[serde(default)]
    pub your_hand: String,
    #[serde(default)]
    pub your_strength: String,
}

/// An `action` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAction {
    /// Seat code of the acting player.
    pub actor: u8,
    pub act: u8,
    #[serde(default)]
    pub act_name: Option<String>,
}

impl PlayerAction {
    /// The action's display name, derived from the code when the worker
    /// did not supply one.
    pub fn display_name(&self) -> String {
        self.act_name
            .clone()
            .unwrap_or_else(|| action_name(self.act))
    }
}

/// Closing fields of a `hand_end` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandEnd {
    pub hand_num: u32,
    #[serde(default)]
    pub final_board: String,
    #[serde(default)]
    pub hero_hand: String,
    #[serde(default)]
    pub vill_hand: String,
    /// Winning seat code; `None` for a split pot.
    #[serde(default)]
    pub winner: Option<u8>,
    pub hero_net: i64,
    pub vill_net: i64,
    pub hero_stack: i64,
    pub vill_stack: i64,
    #[serde(default)]
    pub ended_by_fold: bool,
}

/// What an inbound event means to the hand log.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    HandStart(HandStart),
    Action(PlayerAction),
    HandEnd(HandEnd),
    /// A hand event whose fields did not fit the expected shape.
    Unparsed {
        event_type: String,
        reason: String,
    },
    /// Any other event, including types this crate does not know.
    Other,
}

/// A decoded worker event: the raw object plus its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEvent {
    raw: Map<String, Value>,
    kind: EventKind,
}

impl ProtocolEvent {
    /// Classifies a decoded JSON object by its `type` field.
    pub fn classify(raw: Map<String, Value>) -> Self {
        let kind = match raw.get("type").and_then(Value::as_str) {
            Some("hand_start") => parse_kind(&raw, "hand_start", EventKind::HandStart),
            Some("action") => parse_kind(&raw, "action", EventKind::Action),
            Some("hand_end") => parse_kind(&raw, "hand_end", EventKind::HandEnd),
            _ => EventKind::Other,
        };
        Self { raw, kind }
    }

    /// The event's `type` field, if present and a string.
    pub fn event_type(&self) -> Option<&str> {
        self.raw.get("type").and_then(Value::as_str)
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// The event exactly as the worker sent it.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

fn parse_kind<T, F>(raw: &Map<String, Value>, event_type: &str, wrap: F) -> EventKind
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> EventKind,
{
    match serde_json::from_value::<T>(Value::Object(raw.clone())) {
        Ok(parsed) => wrap(parsed),
        Err(e) => EventKind::Unparsed {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Origin of a synthetic `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// A line on stdout that could not be decoded.
    Decode,
    /// Diagnostic output on the worker's stderr.
    Stderr,
}

/// Why a match ended from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ProcessExit,
}

/// Events generated by the server rather than the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyntheticEvent {
    /// First event on every viewer stream.
    Connected { session_id: String },
    /// A contained fault, reported to viewers instead of ending the session.
    Error {
        source: ErrorSource,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    /// The worker process is gone.
    MatchEnd {
        reason: EndReason,
        code: Option<i32>,
        signal: Option<i32>,
    },
}

impl SyntheticEvent {
    pub fn connected(session_id: impl Into<String>) -> Self {
        SyntheticEvent::Connected {
            session_id: session_id.into(),
        }
    }

    pub fn decode_error(message: impl Into<String>, raw: impl Into<String>) -> Self {
        SyntheticEvent::Error {
            source: ErrorSource::Decode,
            message: message.into(),
            raw: Some(raw.into()),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        SyntheticEvent::Error {
            source: ErrorSource::Stderr,
            message: text.into(),
            raw: None,
        }
    }

    pub fn process_exit(code: Option<i32>, signal: Option<i32>) -> Self {
        SyntheticEvent::MatchEnd {
            reason: EndReason::ProcessExit,
            code,
            signal,
        }
    }
}
