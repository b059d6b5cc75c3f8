//! Control commands sent from the server to a match worker.
//!
//! Every command is a JSON object discriminated by its `type` field. The
//! worker reads them one per line from its standard input.

use serde::{Deserialize, Serialize};

/// One of the two players at the table.
///
/// On the wire a seat is named `"hero"` or `"villain"`; inside events the
/// same seats appear as the integer codes `0` and `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Seat {
    /// Seat code 0.
    #[default]
    Hero,
    /// Seat code 1.
    Villain,
}

/// Match configuration snapshot.
///
/// Sent to the worker as the `start_match` command and echoed into every
/// persisted hand record. Fields missing from a request take the defaults
/// the worker itself would apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// RNG seed for the deal and the search.
    pub seed: u64,
    /// Number of hands in the match.
    pub hands: u32,
    /// Search iterations per decision.
    pub iters: u32,
    /// Exploration constant.
    pub c: f64,
    /// Initial pot, in big blinds.
    pub pot_bb: f64,
    /// Starting stacks, in big blinds.
    pub stacks_bb: f64,
    /// Remove all-in from the legal actions.
    pub no_allin: bool,
    /// Which seat the human plays.
    pub human: Seat,
    /// Which seat is in position on the first hand.
    pub start_ip: Seat,
    /// Bet frequency used by rollouts.
    pub rollout_bet_freq: f64,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            hands: 10,
            iters: 800,
            c: 1.4,
            pot_bb: 6.0,
            stacks_bb: 150.0,
            no_allin: false,
            human: Seat::Hero,
            start_ip: Seat::Hero,
            rollout_bet_freq: 0.55,
        }
    }
}

/// Commands understood by the match worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Start a new match. Always the first command a worker receives.
    StartMatch(MatchSettings),
    /// Apply the human's decision at the current node.
    HumanAction {
        /// Action code (see [`crate::events::ActionCode`]).
        act: u8,
        /// Search iterations for the opponent's following decisions.
        iters: u32,
    },
    /// Deal the next hand after an `await_next_hand` event.
    NextHand {
        /// Search iterations for the opponent's decisions.
        iters: u32,
    },
}

impl ControlCommand {
    /// Returns the wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::StartMatch(_) => "start_match",
            ControlCommand::HumanAction { .. } => "human_action",
            ControlCommand::NextHand { .. } => "next_hand",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_start_match_is_flat_with_type_tag() {
        let cmd = ControlCommand::StartMatch(MatchSettings::default());
        let value: Value = serde_json::to_value(&cmd).unwrap();

        assert_eq!(value["type"], "start_match");
        assert_eq!(value["seed"], 42);
        assert_eq!(value["hands"], 10);
        assert_eq!(value["iters"], 800);
        assert_eq!(value["c"], 1.4);
        assert_eq!(value["pot_bb"], 6.0);
        assert_eq!(value["stacks_bb"], 150.0);
        assert_eq!(value["no_allin"], false);
        assert_eq!(value["human"], "hero");
        assert_eq!(value["start_ip"], "hero");
        assert_eq!(value["rollout_bet_freq"], 0.55);
    }

    #[test]
    fn test_human_action_shape() {
        let cmd = ControlCommand::HumanAction { act: 2, iters: 300 };
        let value: Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, json!({"type": "human_action", "act": 2, "iters": 300}));
    }

    #[test]
    fn test_next_hand_shape() {
        let cmd = ControlCommand::NextHand { iters: 800 };
        let value: Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, json!({"type": "next_hand", "iters": 800}));
    }

    #[test]
    fn test_settings_partial_uses_defaults() {
        let settings: MatchSettings =
            serde_json::from_value(json!({"seed": 7, "human": "villain"})).unwrap();
        assert_eq!(settings.seed, 7);
        assert_eq!(settings.human, Seat::Villain);
        assert_eq!(settings.hands, 10);
        assert_eq!(settings.start_ip, Seat::Hero);
    }

    #[test]
    fn test_settings_rejects_unknown_seat() {
        let result: Result<MatchSettings, _> =
            serde_json::from_value(json!({"human": "dealer"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(
            ControlCommand::StartMatch(MatchSettings::default()).name(),
            "start_match"
        );
        assert_eq!(ControlCommand::NextHand { iters: 1 }.name(), "next_hand");
    }
}
