//! HU Arena server
//!
//! Runs heads-up matches against the agent and streams them to viewers.

use std::path::PathBuf;

use arena::config::Config;
use arena::hand_log::HandLogStore;
use arena::http::NO_LOGS;
use arena::identity::PlayerId;
use arena::orchestrator::{ArenaOrchestrator, OrchestratorEvent};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// HU Arena - match orchestration and streaming server.
#[derive(Parser, Debug)]
#[command(name = "hu-arena")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the server until SIGINT or SIGTERM
    Serve {
        /// Listen address, overriding the configuration
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Print a player's hand log
    Logs {
        /// Player identity
        player: String,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing; RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.validate()?;

            tracing::info!("HU Arena starting...");
            let mut orchestrator = ArenaOrchestrator::new(config)?;
            run_server(&mut orchestrator).await?;
        }
        Commands::Logs { player } => {
            let player = PlayerId::parse(&player)?;
            let store = HandLogStore::new(config.logs.dir.clone());
            match store.read(&player).await? {
                Some(contents) => print!("{contents}"),
                None => println!("{NO_LOGS}"),
            }
        }
        Commands::Config { default } => {
            let shown = if default { Config::default() } else { config };
            print!("{}", shown.to_toml()?);
        }
    }

    Ok(())
}

/// Serve until a shutdown signal arrives.
async fn run_server(orchestrator: &mut ArenaOrchestrator) -> anyhow::Result<()> {
    let mut events = orchestrator.subscribe();
    orchestrator.start().await?;

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::Listening { addr } => {
                    tracing::info!("Listening on http://{}", addr);
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
                OrchestratorEvent::StateChanged(state) => {
                    tracing::debug!("Orchestrator state: {:?}", state);
                }
            }
        }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("Received shutdown signal");

    orchestrator.stop().await?;

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}
