//! Worker process lifecycle.
//!
//! The [`Supervisor`] launches one worker per session, writes control
//! commands to it, and runs a task per session that pumps the worker's
//! stdout and stderr through a [`SessionPipeline`]. When the worker exits,
//! for any reason, the task publishes a `match_end` event and removes the
//! session from the registry. Exit is observed on the process itself, so a
//! descendant that inherited the worker's pipes does not keep the session
//! alive; output still buffered when the worker exits is read for at most
//! [`DRAIN_TIMEOUT`].
//!
//! A worker that hangs without exiting keeps its session alive until it is
//! terminated explicitly.

use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use protocol::{ControlCommand, MatchSettings, SyntheticEvent};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::error::SessionError;
use super::hub::{BroadcastHub, Viewer};
use super::pipeline::SessionPipeline;
use super::registry::{Session, SessionRegistry};
use super::SessionId;
use crate::config::{Config, SessionConfig, WorkerConfig};
use crate::hand_log::{HandLogStore, RecordContext};
use crate::identity::PlayerId;

/// Read buffer size for the worker's output streams.
const READ_CHUNK: usize = 8 * 1024;

/// How long output is still read after the worker process has exited.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Owns the worker processes of all sessions.
pub struct Supervisor {
    worker: WorkerConfig,
    limits: SessionConfig,
    registry: Arc<SessionRegistry>,
    store: HandLogStore,
    tasks: TaskTracker,
    /// Held from the capacity check until the new session is registered.
    admission: Mutex<()>,
}

impl Supervisor {
    pub fn new(worker: WorkerConfig, limits: SessionConfig, store: HandLogStore) -> Self {
        Self {
            worker,
            limits,
            registry: Arc::new(SessionRegistry::new()),
            store,
            tasks: TaskTracker::new(),
            admission: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.worker.clone(),
            config.session.clone(),
            HandLogStore::new(config.logs.dir.clone()),
        )
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &HandLogStore {
        &self.store
    }

    /// Starts a new match for a player.
    ///
    /// The identity is sanitized before anything is spawned. The worker is
    /// launched and sent `start_match`; the call returns without waiting for
    /// the worker to respond.
    pub async fn create_session(
        &self,
        raw_player: &str,
        settings: MatchSettings,
    ) -> Result<SessionId, SessionError> {
        let player = PlayerId::parse(raw_player)?;

        let admission = self.admission.lock().await;
        let active = self.registry.len();
        if active >= self.limits.max_sessions {
            return Err(SessionError::CapacityReached(active));
        }

        let session_id = Uuid::new_v4().to_string();
        let mut child = self.spawn_worker()?;
        let pid = child.id();

        let streams = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = streams else {
            let _ = child.start_kill();
            return Err(SessionError::SpawnFailed("worker streams not captured".to_string()));
        };

        let hub = Arc::new(BroadcastHub::new(session_id.clone(), self.limits.viewer_buffer));
        let session = Arc::new(Session::new(
            session_id.clone(),
            player.clone(),
            settings.clone(),
            pid,
            Box::new(stdin),
            Arc::clone(&hub),
        ));
        let pipeline = SessionPipeline::new(
            RecordContext {
                player: player.clone(),
                session_id: session_id.clone(),
                settings: settings.clone(),
            },
            self.store.clone(),
            hub,
        );

        // Registered before the task starts so an early exit can unregister it.
        self.registry.insert(Arc::clone(&session));
        drop(admission);
        self.tasks.spawn(run_session(
            Arc::clone(&self.registry),
            Arc::clone(&session),
            child,
            stdout,
            stderr,
            pipeline,
            self.worker.terminate_grace(),
        ));

        if let Err(e) = session.send(&ControlCommand::StartMatch(settings)).await {
            self.registry.remove(&session_id);
            session.terminate();
            return Err(e);
        }

        tracing::info!(
            session_id = %session_id,
            player = %player,
            pid = ?pid,
            "Created new session"
        );

        Ok(session_id)
    }

    /// Writes a command to a session's worker without waiting for a reply.
    pub async fn send_command(
        &self,
        session_id: &str,
        command: &ControlCommand,
    ) -> Result<(), SessionError> {
        let session = self.registry.get(session_id)?;
        session.send(command).await
    }

    /// Submits the human player's action.
    ///
    /// `iters` defaults to the session's configured search iterations.
    pub async fn human_action(
        &self,
        session_id: &str,
        act: u8,
        iters: Option<u32>,
    ) -> Result<(), SessionError> {
        let session = self.registry.get(session_id)?;
        let iters = iters.unwrap_or(session.settings().iters);
        session.send(&ControlCommand::HumanAction { act, iters }).await
    }

    /// Asks the worker to deal the next hand.
    pub async fn next_hand(&self, session_id: &str, iters: Option<u32>) -> Result<(), SessionError> {
        let session = self.registry.get(session_id)?;
        let iters = iters.unwrap_or(session.settings().iters);
        session.send(&ControlCommand::NextHand { iters }).await
    }

    /// Attaches a viewer to a session.
    pub async fn subscribe(&self, session_id: &str) -> Result<Viewer, SessionError> {
        let session = self.registry.get(session_id)?;
        session
            .hub()
            .subscribe()
            .await
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))
    }

    /// Stops a session and removes it from the registry immediately.
    pub fn terminate_session(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self
            .registry
            .remove(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        session.terminate();
        tracing::info!(session_id = %session_id, "Session terminated");
        Ok(())
    }

    /// Terminates every session. Returns how many were stopped.
    pub fn terminate_all(&self) -> usize {
        let sessions = self.registry.drain();
        for session in &sessions {
            session.terminate();
        }
        if !sessions.is_empty() {
            tracing::info!(count = sessions.len(), "Terminated all sessions");
        }
        sessions.len()
    }

    /// Terminates every session and waits for their workers to be reaped.
    pub async fn shutdown(&self, timeout: Duration) {
        self.terminate_all();
        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "Timed out waiting for session tasks");
        }
    }

    fn spawn_worker(&self) -> Result<Child, SessionError> {
        let mut command = Command::new(&self.worker.program);
        command
            .args(&self.worker.args)
            .envs(&self.worker.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.worker.cwd {
            command.current_dir(cwd);
        }

        command
            .spawn()
            .map_err(|e| SessionError::SpawnFailed(format!("{}: {e}", self.worker.program)))
    }
}

/// I/O task for one session.
async fn run_session(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    mut pipeline: SessionPipeline,
    grace: Duration,
) {
    let cancel = session.cancel_token().clone();
    let mut output = WorkerOutput::new(stdout, stderr);

    let exited = output
        .pump(&mut pipeline, &cancel, session.id(), child.wait())
        .await;
    let status = match exited {
        Some(status) => {
            output
                .pump(&mut pipeline, &cancel, session.id(), tokio::time::sleep(DRAIN_TIMEOUT))
                .await;
            if output.stdout_open && !cancel.is_cancelled() {
                pipeline.finish().await;
            }
            status
        }
        None => wait_for_exit(&mut child, &cancel, grace, session.id()).await,
    };
    drop(output);

    let (code, signal) = match &status {
        Ok(status) => exit_reason(status),
        Err(e) => {
            tracing::warn!(session_id = %session.id(), error = %e, "Failed to reap worker");
            (None, None)
        }
    };

    pipeline
        .hub()
        .publish(&SyntheticEvent::process_exit(code, signal))
        .await;
    registry.remove(session.id());
    pipeline.hub().close().await;

    tracing::info!(
        session_id = %session.id(),
        code = ?code,
        signal = ?signal,
        "Worker exited"
    );
}

/// The read ends of a worker's stdout and stderr.
struct WorkerOutput {
    stdout: ChildStdout,
    stderr: ChildStderr,
    stdout_open: bool,
    stderr_open: bool,
    out_buf: Vec<u8>,
    err_buf: Vec<u8>,
}

impl WorkerOutput {
    fn new(stdout: ChildStdout, stderr: ChildStderr) -> Self {
        Self {
            stdout,
            stderr,
            stdout_open: true,
            stderr_open: true,
            out_buf: vec![0u8; READ_CHUNK],
            err_buf: vec![0u8; READ_CHUNK],
        }
    }

    /// Feeds output to the pipeline until both streams close, the session is
    /// cancelled, or `until` completes.
    ///
    /// Returns the output of `until` if it completed first. Reads take
    /// priority over `until`, so data already in the pipes is consumed first.
    async fn pump<F: Future>(
        &mut self,
        pipeline: &mut SessionPipeline,
        cancel: &CancellationToken,
        session_id: &str,
        until: F,
    ) -> Option<F::Output> {
        tokio::pin!(until);

        while self.stdout_open || self.stderr_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                read = self.stdout.read(&mut self.out_buf), if self.stdout_open => match chunk(read, "stdout", session_id) {
                    Some(n) if !cancel.is_cancelled() => pipeline.on_stdout(&self.out_buf[..n]).await,
                    Some(_) => return None,
                    None => {
                        self.stdout_open = false;
                        if !cancel.is_cancelled() {
                            pipeline.finish().await;
                        }
                    }
                },
                read = self.stderr.read(&mut self.err_buf), if self.stderr_open => match chunk(read, "stderr", session_id) {
                    Some(n) if !cancel.is_cancelled() => pipeline.on_stderr(&self.err_buf[..n]).await,
                    Some(_) => return None,
                    None => self.stderr_open = false,
                },
                done = &mut until => return Some(done),
            }
        }
        None
    }
}

/// Returns the number of bytes read, or `None` at end of stream.
fn chunk(read: std::io::Result<usize>, stream: &str, session_id: &str) -> Option<usize> {
    match read {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(session_id = %session_id, stream, error = %e, "Worker stream read failed");
            None
        }
    }
}

/// Waits for the worker to exit. After cancellation the worker is sent
/// SIGTERM, then force-killed once `grace` has passed.
async fn wait_for_exit(
    child: &mut Child,
    cancel: &CancellationToken,
    grace: Duration,
    session_id: &str,
) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => return status,
        _ = cancel.cancelled() => {}
    }

    request_exit(child, session_id);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(session_id = %session_id, pid = ?child.id(), "Worker ignored SIGTERM, killing");
            child.start_kill()?;
            child.wait().await
        }
    }
}

/// Sends SIGTERM to a worker that has not been reaped yet.
///
/// Returns `false` without signalling once the exit status has been
/// collected, since the pid may already belong to another process.
fn request_exit(child: &Child, session_id: &str) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => {
            tracing::debug!(session_id = %session_id, pid, "Sent SIGTERM to worker");
            true
        }
        Err(e) => {
            tracing::debug!(session_id = %session_id, pid, error = %e, "Worker already gone");
            false
        }
    }
}

fn exit_reason(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), status.signal())
}
