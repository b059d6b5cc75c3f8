//! Registry of live sessions.
//!
//! This module provides a thread-safe map from session id to the handles
//! needed to drive a running match: the worker's stdin, its viewer hub and
//! the token that stops its I/O task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use protocol::{encode_command, ControlCommand, MatchSettings};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::SessionError;
use super::hub::BroadcastHub;
use super::SessionId;
use crate::identity::PlayerId;

/// Writable end of a worker's stdin.
pub type WorkerInput = Box<dyn AsyncWrite + Send + Unpin>;

/// A running match bound to one worker process.
pub struct Session {
    id: SessionId,
    player: PlayerId,
    settings: MatchSettings,
    pid: Option<u32>,
    created_at: DateTime<Utc>,
    stdin: Mutex<Option<WorkerInput>>,
    hub: Arc<BroadcastHub>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        id: SessionId,
        player: PlayerId,
        settings: MatchSettings,
        pid: Option<u32>,
        stdin: WorkerInput,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            id,
            player,
            settings,
            pid,
            created_at: Utc::now(),
            stdin: Mutex::new(Some(stdin)),
            hub,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Process ID of the worker.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Token cancelled when the session is terminated.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Writes one command line to the worker.
    ///
    /// Writes are serialized so concurrent callers never interleave bytes.
    pub async fn send(&self, command: &ControlCommand) -> Result<(), SessionError> {
        let line = encode_command(command)?;

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| SessionError::WriteFailed("worker input closed".to_string()))?;

        let result = async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(session_id = %self.id, error = %e, "Worker input write failed");
            // A broken pipe stays broken.
            *guard = None;
            return Err(SessionError::WriteFailed(e.to_string()));
        }

        tracing::debug!(session_id = %self.id, command = command.name(), "Sent command to worker");
        Ok(())
    }

    /// Stops the session.
    ///
    /// Cancels the I/O task so no further events are logged or broadcast.
    /// The task owns the worker process and signals it. Safe to call more
    /// than once.
    pub fn terminate(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        tracing::debug!(session_id = %self.id, "Session cancelled");
    }

    /// Snapshot of public session metadata.
    pub async fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            player: self.player.to_string(),
            pid: self.pid,
            created_at: self.created_at,
            viewers: self.hub.viewer_count().await,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("player", &self.player)
            .field("pid", &self.pid)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Information about a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    #[serde(rename = "session_id")]
    pub id: SessionId,
    /// Sanitized player identity.
    pub player: String,
    /// Process ID of the worker.
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    /// Number of attached viewers.
    pub viewers: usize,
}

/// Thread-safe session registry using DashMap.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its id.
    pub fn insert(&self, session: Arc<Session>) {
        let id = session.id().clone();
        if self.sessions.insert(id.clone(), session).is_some() {
            tracing::warn!(session_id = %id, "Replaced existing session entry");
        }
    }

    /// Looks up a live session.
    pub fn get(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))
    }

    /// Removes a session. Returns `None` if it was already gone.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Lists all live sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        // Snapshot first so no shard lock is held across an await.
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Removes and returns every session.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}
