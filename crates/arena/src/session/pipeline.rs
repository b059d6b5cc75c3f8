//! Routing of worker output for one session.
//!
//! Stdout chunks are decoded into events. Each event first updates the hand
//! log and is then forwarded unchanged to viewers, so a viewer that sees a
//! `hand_end` can already read the hand from the player's log. Stderr chunks
//! and undecodable lines become `error` events; neither ends the session.

use std::sync::Arc;

use chrono::Utc;
use protocol::{LineDecoder, ProtocolEvent, SyntheticEvent};

use super::hub::BroadcastHub;
use crate::hand_log::{HandAssembler, HandLogStore, RecordContext};

/// Per-session decoding, logging and fan-out state.
pub struct SessionPipeline {
    decoder: LineDecoder,
    assembler: HandAssembler,
    store: HandLogStore,
    hub: Arc<BroadcastHub>,
    context: RecordContext,
}

impl SessionPipeline {
    pub fn new(context: RecordContext, store: HandLogStore, hub: Arc<BroadcastHub>) -> Self {
        Self {
            decoder: LineDecoder::new(),
            assembler: HandAssembler::new(),
            store,
            hub,
            context,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn assembler(&self) -> &HandAssembler {
        &self.assembler
    }

    /// Handles a chunk read from the worker's stdout.
    pub async fn on_stdout(&mut self, chunk: &[u8]) {
        self.decoder.push(chunk);
        while let Some(result) = self.decoder.next_event() {
            self.dispatch(result).await;
        }
    }

    /// Handles a chunk read from the worker's stderr.
    ///
    /// Each chunk becomes one `error` event carrying the text as read,
    /// newlines included.
    pub async fn on_stderr(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(chunk);
        tracing::debug!(
            session_id = %self.context.session_id,
            stderr = %text.trim_end(),
            "Worker stderr"
        );
        self.hub.publish(&SyntheticEvent::stderr(text)).await;
    }

    /// Flushes a trailing line left without a delimiter at end of stream.
    pub async fn finish(&mut self) {
        if let Some(result) = self.decoder.finish() {
            self.dispatch(result).await;
        }
    }

    async fn dispatch(&mut self, result: protocol::Result<ProtocolEvent>) {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.context.session_id,
                    error = %e,
                    "Undecodable worker output"
                );
                let raw = e.line().unwrap_or_default().to_string();
                self.hub
                    .publish(&SyntheticEvent::decode_error(e.to_string(), raw))
                    .await;
                return;
            }
        };

        if let Some(hand) = self.assembler.observe(event.kind(), Utc::now()) {
            let hand_num = hand.hand_num;
            let record = self.context.record(hand);
            match self.store.append(&self.context.player, &record).await {
                Ok(()) => tracing::info!(
                    session_id = %self.context.session_id,
                    player = %self.context.player,
                    hand_num,
                    "Logged hand"
                ),
                Err(e) => tracing::error!(
                    session_id = %self.context.session_id,
                    player = %self.context.player,
                    hand_num,
                    error = %e,
                    "Failed to append hand log"
                ),
            }
        }

        self.hub.publish(event.raw()).await;
    }
}
