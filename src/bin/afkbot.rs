//! CLI binary for afkbot.
//!
//! Loads the configuration, installs logging, and runs the connection
//! supervisor until Ctrl+C.

use afkbot::config::SessionBackend;
use afkbot::session::{SessionConnector, SimulatedConnector, TcpConnector};
use afkbot::{BotConfig, ConnectionSupervisor};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Keeps an account present on a server while you are away.
#[derive(Parser)]
#[command(name = "afkbot", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host, overrides `connection.host`.
    #[arg(long)]
    host: Option<String>,

    /// Server port, overrides `connection.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Account name, overrides `connection.username`.
    #[arg(short, long)]
    username: Option<String>,

    /// Use the in-memory simulated backend instead of connecting over TCP.
    #[arg(long)]
    dry_run: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration to this path and exit.
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<BotConfig> {
        let mut config = match &self.config {
            Some(path) => BotConfig::from_file(path)?,
            None => {
                let path = BotConfig::default_config_path();
                if path.is_file() {
                    BotConfig::from_file(&path)?
                } else {
                    BotConfig::default()
                }
            }
        };

        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(username) = &self.username {
            config.connection.username = username.clone();
        }
        if self.dry_run {
            config.session.backend = SessionBackend::Simulated;
        }
        Ok(config)
    }
}

fn connector_for(config: &BotConfig) -> Arc<dyn SessionConnector> {
    match config.session.backend {
        SessionBackend::Simulated => Arc::new(SimulatedConnector::from_config(&config.session)),
        SessionBackend::Tcp => Arc::new(TcpConnector::from_config(&config.session)),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    if let Some(path) = &cli.save_config {
        config.save_to_file(path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    config.validate()?;
    let _log_guard = afkbot::logging::init(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.session.backend,
        "afkbot starting"
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received");
                ctrl_c.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for Ctrl+C"),
        }
    });

    let connector = connector_for(&config);
    let stats = ConnectionSupervisor::new(config, connector)
        .run(shutdown)
        .await;

    info!(
        attempts = stats.connect_attempts,
        sessions = stats.sessions_ready,
        reconnects = stats.reconnects_scheduled,
        "afkbot shut down cleanly"
    );
    Ok(())
}
