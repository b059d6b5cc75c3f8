//! Configuration management for the HU Arena server.
//!
//! Server settings live in a single TOML file; every field has a default.
//! The default configuration path is `~/.config/hu-arena/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen address for the HTTP surface.
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind must be a socket address like 127.0.0.1:8787, got {0}")]
    InvalidBind(String),

    #[error("max_sessions must be between 1 and 10000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("viewer_buffer must be greater than 0, got {0}")]
    InvalidViewerBuffer(usize),

    #[error("worker program not found: {0}")]
    InvalidWorkerProgram(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Accepted `log_level` values.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the HU Arena server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener and logging.
    pub server: ServerConfig,

    /// How match workers are launched.
    pub worker: WorkerConfig,

    /// Session limits.
    pub session: SessionConfig,

    /// Hand log storage.
    pub logs: LogsConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP surface binds to.
    pub bind: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Match worker launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program to execute, absolute or resolved on `PATH`.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Working directory for the worker. Inherits the server's when unset.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables for the worker.
    pub env: BTreeMap<String, String>,

    /// Grace period between SIGTERM and SIGKILL on termination.
    pub terminate_grace_ms: u64,
}

/// Session management configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Per-viewer event buffer. A viewer that falls this far behind is dropped.
    pub viewer_buffer: usize,
}

/// Hand log configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogsConfig {
    /// Directory holding one append-only file per player.
    pub dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        Self {
            program: "python3".to_string(),
            args: vec![
                "-u".to_string(),
                "-m".to_string(),
                "scripts.play_vs_agent_worker".to_string(),
            ],
            cwd: None,
            env,
            terminate_grace_ms: 2000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            viewer_buffer: crate::session::DEFAULT_VIEWER_BUFFER,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir().join("hand_logs"),
        }
    }
}

impl WorkerConfig {
    /// Grace period between SIGTERM and SIGKILL.
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hu-arena")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hu-arena")
}

impl Config {
    /// Overlay `HU_ARENA_*` environment variables onto the loaded values.
    ///
    /// Empty variables are ignored.
    /// Supported variables:
    /// - HU_ARENA_BIND: Override the listen address
    /// - HU_ARENA_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - HU_ARENA_LOG_DIR: Override the hand log directory
    /// - HU_ARENA_WORKER_PROGRAM: Override the worker program
    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = non_empty_env("HU_ARENA_BIND") {
            tracing::info!("Overriding bind from environment: {}", bind);
            self.server.bind = bind;
        }

        if let Some(level) = non_empty_env("HU_ARENA_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.server.log_level = level;
        }

        if let Some(dir) = non_empty_env("HU_ARENA_LOG_DIR") {
            tracing::info!("Overriding logs.dir from environment: {}", dir);
            self.logs.dir = PathBuf::from(dir);
        }

        if let Some(program) = non_empty_env("HU_ARENA_WORKER_PROGRAM") {
            tracing::info!("Overriding worker.program from environment: {}", program);
            self.worker.program = program;
        }
    }

    /// Validate the configuration values.
    ///
    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBind(self.server.bind.clone()));
        }

        if self.session.max_sessions < 1 || self.session.max_sessions > 10000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.viewer_buffer == 0 {
            return Err(ConfigError::InvalidViewerBuffer(self.session.viewer_buffer));
        }

        let program = Path::new(&self.worker.program);
        if program.is_absolute() {
            if !program.exists() {
                return Err(ConfigError::InvalidWorkerProgram(
                    self.worker.program.clone(),
                ));
            }
        } else if which::which(&self.worker.program).is_err() {
            return Err(ConfigError::InvalidWorkerProgram(
                self.worker.program.clone(),
            ));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Parsed listen address. Only meaningful after [`Config::validate`].
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Write the configuration as TOML.
    ///
    /// Missing parent directories are created.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Render a TOML parse error with its byte span.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
