//! Rebuilds complete hand records from the worker's event stream.
//!
//! The worker never emits a finished hand. It announces a hand, streams its
//! actions, and later reports the result. [`HandAssembler`] holds the hand in
//! progress between those events and yields a [`HandSummary`] once the end
//! of the hand has been seen. A hand that never ends is never logged.

use chrono::{DateTime, Utc};
use protocol::{EventKind, HandEnd, HandStart, MatchSettings, PlayerAction, Seat};
use serde::{Deserialize, Serialize};

use crate::identity::PlayerId;
use crate::session::SessionId;

/// One action as it appears in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedAction {
    pub actor: u8,
    pub act: u8,
    pub act_name: String,
    pub ts: DateTime<Utc>,
}

/// A completed hand: start header, actions and result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandSummary {
    pub hand_num: u32,
    pub human: Seat,
    pub hero_is_ip: bool,
    pub hero_stack_start: i64,
    pub vill_stack_start: i64,
    pub hero_stack_end: i64,
    pub vill_stack_end: i64,
    pub flop: String,
    pub your_hand: String,
    pub your_strength: String,
    pub final_board: String,
    pub hero_hand: String,
    pub vill_hand: String,
    pub winner: Option<u8>,
    pub hero_net: i64,
    pub vill_net: i64,
    pub ended_by_fold: bool,
    pub actions: Vec<LoggedAction>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// One line of a player's hand log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandRecord {
    pub ts: DateTime<Utc>,
    pub player: String,
    pub session_id: SessionId,
    pub settings: MatchSettings,
    pub hand: HandSummary,
}

/// Session-wide fields echoed into every record.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub player: PlayerId,
    pub session_id: SessionId,
    pub settings: MatchSettings,
}

impl RecordContext {
    /// Wraps a completed hand into a log record.
    pub fn record(&self, hand: HandSummary) -> HandRecord {
        HandRecord {
            ts: hand.ended_at,
            player: self.player.to_string(),
            session_id: self.session_id.clone(),
            settings: self.settings.clone(),
            hand,
        }
    }
}

/// The hand currently being assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingHand {
    pub header: HandStart,
    pub started_at: DateTime<Utc>,
    pub actions: Vec<LoggedAction>,
}

impl PendingHand {
    fn complete(self, end: &HandEnd, ended_at: DateTime<Utc>) -> HandSummary {
        let PendingHand {
            header,
            started_at,
            actions,
        } = self;
        HandSummary {
            hand_num: header.hand_num,
            human: header.human,
            hero_is_ip: header.hero_is_ip,
            hero_stack_start: header.hero_stack,
            vill_stack_start: header.vill_stack,
            hero_stack_end: end.hero_stack,
            vill_stack_end: end.vill_stack,
            flop: header.flop,
            your_hand: header.your_hand,
            your_strength: header.your_strength,
            final_board: end.final_board.clone(),
            hero_hand: end.hero_hand.clone(),
            vill_hand: end.vill_hand.clone(),
            winner: end.winner,
            hero_net: end.hero_net,
            vill_net: end.vill_net,
            ended_by_fold: end.ended_by_fold,
            actions,
            started_at,
            ended_at,
        }
    }
}

/// In-progress hand accumulator for one session.
#[derive(Debug, Default)]
pub struct HandAssembler {
    pending: Option<PendingHand>,
}

impl HandAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one event, observed at `now`.
    ///
    /// Returns the completed hand when `kind` is a hand end that closes the
    /// pending hand.
    pub fn observe(&mut self, kind: &EventKind, now: DateTime<Utc>) -> Option<HandSummary> {
        match kind {
            EventKind::HandStart(start) => {
                self.start(start, now);
                None
            }
            EventKind::Action(action) => {
                self.record_action(action, now);
                None
            }
            EventKind::HandEnd(end) => self.finish(end, now),
            EventKind::Unparsed { event_type, reason } => {
                tracing::warn!(event_type = %event_type, reason = %reason, "Hand event ignored by log");
                None
            }
            EventKind::Other => None,
        }
    }

    /// The hand in progress, if any.
    pub fn pending(&self) -> Option<&PendingHand> {
        self.pending.as_ref()
    }

    fn start(&mut self, start: &HandStart, now: DateTime<Utc>) {
        if let Some(stale) = self.pending.take() {
            tracing::debug!(
                hand_num = stale.header.hand_num,
                actions = stale.actions.len(),
                "Discarding unfinished hand"
            );
        }
        self.pending = Some(PendingHand {
            header: start.clone(),
            started_at: now,
            actions: Vec::new(),
        });
    }

    fn record_action(&mut self, action: &PlayerAction, now: DateTime<Utc>) {
        match self.pending.as_mut() {
            Some(pending) => pending.actions.push(LoggedAction {
                actor: action.actor,
                act: action.act,
                act_name: action.display_name(),
                ts: now,
            }),
            None => tracing::debug!(act = action.act, "Action outside of a hand, not logged"),
        }
    }

    fn finish(&mut self, end: &HandEnd, now: DateTime<Utc>) -> Option<HandSummary> {
        let Some(pending) = self.pending.take() else {
            tracing::debug!(hand_num = end.hand_num, "Hand end without a started hand, not logged");
            return None;
        };
        if pending.header.hand_num != end.hand_num {
            tracing::warn!(
                started = pending.header.hand_num,
                ended = end.hand_num,
                "Hand number changed between start and end"
            );
        }
        Some(pending.complete(end, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use protocol::{LineDecoder, ProtocolEvent};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn hand_start(hand_num: u32) -> HandStart {
        HandStart {
            hand_num,
            human: Seat::Hero,
            hero_is_ip: true,
            hero_stack: 14700,
            vill_stack: 14700,
            flop: "Ah 7d 2c".to_string(),
            your_hand: "Ks Kd".to_string(),
            your_strength: "one pair".to_string(),
        }
    }

    fn action(actor: u8, act: u8) -> PlayerAction {
        PlayerAction {
            actor,
            act,
            act_name: None,
        }
    }

    fn hand_end(hand_num: u32) -> HandEnd {
        HandEnd {
            hand_num,
            final_board: "Ah 7d 2c 9s 3h".to_string(),
            hero_hand: "Ks Kd".to_string(),
            vill_hand: "Qc Jc".to_string(),
            winner: Some(0),
            hero_net: 120,
            vill_net: -120,
            hero_stack: 15120,
            vill_stack: 14880,
            ended_by_fold: false,
        }
    }

    #[test]
    fn test_full_hand_merges_header_actions_and_result() {
        let mut asm = HandAssembler::new();
        assert!(asm.observe(&EventKind::HandStart(hand_start(1)), at(0)).is_none());
        assert!(asm.observe(&EventKind::Action(action(1, 1)), at(1)).is_none());
        assert!(asm.observe(&EventKind::Action(action(0, 3)), at(2)).is_none());

        let hand = asm.observe(&EventKind::HandEnd(hand_end(1)), at(3)).unwrap();
        assert_eq!(hand.hand_num, 1);
        assert_eq!(hand.hero_stack_start, 14700);
        assert_eq!(hand.hero_stack_end, 15120);
        assert_eq!(hand.flop, "Ah 7d 2c");
        assert_eq!(hand.final_board, "Ah 7d 2c 9s 3h");
        assert_eq!(hand.winner, Some(0));
        assert_eq!(hand.actions.len(), 2);
        assert_eq!(hand.actions[0].act_name, "CHECK");
        assert_eq!(hand.actions[1].act_name, "BET_HALF_POT");
        assert_eq!(hand.actions[1].ts, at(2));
        assert_eq!(hand.started_at, at(0));
        assert_eq!(hand.ended_at, at(3));
        assert!(asm.pending().is_none());
    }

    #[test]
    fn test_new_start_discards_unfinished_hand() {
        let mut asm = HandAssembler::new();
        asm.observe(&EventKind::HandStart(hand_start(1)), at(0));
        asm.observe(&EventKind::Action(action(1, 1)), at(1));
        asm.observe(&EventKind::HandStart(hand_start(2)), at(2));

        let pending = asm.pending().unwrap();
        assert_eq!(pending.header.hand_num, 2);
        assert!(pending.actions.is_empty());

        let hand = asm.observe(&EventKind::HandEnd(hand_end(2)), at(3)).unwrap();
        assert_eq!(hand.hand_num, 2);
        assert!(hand.actions.is_empty());
    }

    #[test]
    fn test_action_without_hand_is_ignored() {
        let mut asm = HandAssembler::new();
        assert!(asm.observe(&EventKind::Action(action(0, 2)), at(0)).is_none());
        assert!(asm.pending().is_none());
    }

    #[test]
    fn test_end_without_start_yields_nothing() {
        let mut asm = HandAssembler::new();
        assert!(asm.observe(&EventKind::HandEnd(hand_end(1)), at(0)).is_none());
    }

    #[test]
    fn test_hand_is_logged_once() {
        let mut asm = HandAssembler::new();
        asm.observe(&EventKind::HandStart(hand_start(1)), at(0));
        assert!(asm.observe(&EventKind::HandEnd(hand_end(1)), at(1)).is_some());
        assert!(asm.observe(&EventKind::HandEnd(hand_end(1)), at(2)).is_none());
    }

    #[test]
    fn test_other_and_unparsed_events_do_not_touch_pending() {
        let mut asm = HandAssembler::new();
        asm.observe(&EventKind::HandStart(hand_start(1)), at(0));
        asm.observe(&EventKind::Other, at(1));
        asm.observe(
            &EventKind::Unparsed {
                event_type: "action".to_string(),
                reason: "missing field `act`".to_string(),
            },
            at(2),
        );
        assert!(asm.pending().unwrap().actions.is_empty());
    }

    #[test]
    fn test_worker_supplied_action_name_is_kept() {
        let mut asm = HandAssembler::new();
        asm.observe(&EventKind::HandStart(hand_start(1)), at(0));
        let named = PlayerAction {
            actor: 1,
            act: 4,
            act_name: Some("RAISE_BIG".to_string()),
        };
        asm.observe(&EventKind::Action(named), at(1));
        assert_eq!(asm.pending().unwrap().actions[0].act_name, "RAISE_BIG");
    }

    #[test]
    fn test_result_independent_of_chunking() {
        let stream = concat!(
            r#"{"type":"hand_start","hand_num":1,"human":"hero","hero_is_ip":true,"hero_stack":14700,"vill_stack":14700,"flop":"Ah 7d 2c","your_hand":"Ks Kd","your_strength":"one pair"}"#,
            "\n",
            r#"{"type":"state","pot":600}"#,
            "\n",
            r#"{"type":"action","actor":1,"act":1,"act_name":"CHECK"}"#,
            "\n",
            r#"{"type":"action","actor":0,"act":3,"act_name":"BET_HALF_POT"}"#,
            "\n",
            r#"{"type":"hand_end","hand_num":1,"final_board":"Ah 7d 2c 9s 3h","hero_hand":"Ks Kd","vill_hand":"Qc Jc","winner":0,"hero_net":120,"vill_net":-120,"hero_stack":15120,"vill_stack":14880,"ended_by_fold":false}"#,
            "\n",
        );

        let assemble = |chunk_size: usize| {
            let mut decoder = LineDecoder::new();
            let mut asm = HandAssembler::new();
            let mut hands = Vec::new();
            for chunk in stream.as_bytes().chunks(chunk_size) {
                for event in decoder.decode_chunk(chunk) {
                    let event: ProtocolEvent = event.unwrap();
                    hands.extend(asm.observe(event.kind(), at(0)));
                }
            }
            hands
        };

        let whole = assemble(stream.len());
        assert_eq!(whole.len(), 1);
        assert_eq!(whole[0].actions.len(), 2);
        for size in [1, 2, 3, 7, 64] {
            assert_eq!(assemble(size), whole, "chunk size {size}");
        }
    }

    #[test]
    fn test_record_context_wraps_summary() {
        let ctx = RecordContext {
            player: PlayerId::parse("alice").unwrap(),
            session_id: "sid".to_string(),
            settings: MatchSettings::default(),
        };
        let mut asm = HandAssembler::new();
        asm.observe(&EventKind::HandStart(hand_start(1)), at(0));
        let hand = asm.observe(&EventKind::HandEnd(hand_end(1)), at(5)).unwrap();

        let record = ctx.record(hand);
        assert_eq!(record.player, "alice");
        assert_eq!(record.session_id, "sid");
        assert_eq!(record.ts, at(5));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["hand"]["winner"], 0);
        assert_eq!(value["settings"]["seed"], 42);
        assert!(value["hand"]["actions"].as_array().unwrap().is_empty());
    }
}
