//! Arena orchestrator for wiring together all components.
//!
//! This module provides the `ArenaOrchestrator` that owns the session
//! supervisor, serves the HTTP API, and coordinates graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::{self, AppState};
use crate::session::Supervisor;

/// Extra time allowed for session tasks to finish after the worker grace period.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding the listener.
    Starting,
    /// Running and accepting requests.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// The HTTP listener is bound.
    Listening { addr: SocketAddr },
    /// Error occurred.
    Error { message: String },
}

/// Orchestrator that manages the server's subsystems.
pub struct ArenaOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Supervisor for all worker sessions.
    supervisor: Arc<Supervisor>,
    /// Address the listener is bound to, once running.
    local_addr: Option<SocketAddr>,
    /// HTTP server task.
    server_task: Option<JoinHandle<()>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl ArenaOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.logs.dir).with_context(|| {
            format!("Failed to create log directory: {}", config.logs.dir.display())
        })?;
        info!("Hand logs in {}", config.logs.dir.display());

        let supervisor = Arc::new(Supervisor::from_config(&config));
        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            supervisor,
            local_addr: None,
            server_task: None,
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Binds the listener and starts serving the API.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting arena orchestrator...");

        let bind = self.config.bind_addr()?;
        let listener = match TcpListener::bind(bind).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                return Err(e).with_context(|| format!("Failed to bind {bind}"));
            }
        };
        let addr = listener.local_addr().context("Failed to read listener address")?;
        self.local_addr = Some(addr);

        let app = http::router(AppState::new(Arc::clone(&self.supervisor)));
        let shutdown_token = self.shutdown_token.clone();
        let event_tx = self.event_tx.clone();

        self.server_task = Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("HTTP server failed: {}", e);
                let _ = event_tx.send(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
            }
            debug!("HTTP server task finished");
        }));

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::Listening { addr });
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!(%addr, "Arena orchestrator started");
        Ok(())
    }

    /// Stops the orchestrator gracefully.
    ///
    /// Stops accepting requests and terminates every session.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping arena orchestrator...");

        // Signal shutdown to all tasks
        self.shutdown_token.cancel();

        // Sessions first: open event streams would otherwise hold the server open.
        let timeout = self.config.worker.terminate_grace() + SHUTDOWN_SLACK;
        self.supervisor.shutdown(timeout).await;

        if let Some(task) = self.server_task.take() {
            if let Err(e) = task.await {
                warn!("HTTP server task panicked: {}", e);
            }
        }
        self.local_addr = None;

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Arena orchestrator stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the session supervisor.
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Returns the bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
