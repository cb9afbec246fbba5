//! # wirehub
//!
//! Event channel server binary: loads settings, installs logging and
//! metrics, registers the demo handlers and serves until a shutdown signal.

#![deny(unsafe_code)]

mod handlers;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use wirehub_server::{ServerConfig, SocketConfig, WireHubServer};
use wirehub_settings::WireHubSettings;

/// wirehub event channel server.
#[derive(Parser, Debug)]
#[command(name = "wirehub", about = "Real-time event channel over WebSocket")]
struct Cli {
    /// Settings file (defaults to `~/.wirehub/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `info` or `wirehub_server=debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Merge CLI flags over loaded settings.
    fn server_config(&self, settings: &WireHubSettings) -> ServerConfig {
        let socket = &settings.socket;
        ServerConfig {
            host: self.host.clone().unwrap_or_else(|| settings.server.host.clone()),
            port: self.port.unwrap_or(settings.server.port),
            max_connections: settings.server.max_connections,
            socket: SocketConfig {
                pong_wait_ms: socket.pong_wait_ms,
                ping_interval_ms: socket.ping_interval_ms,
                max_message_size: socket.max_message_size,
                read_buffer_size: socket.read_buffer_size,
                write_buffer_size: socket.write_buffer_size,
                send_queue_capacity: socket.send_queue_capacity,
            },
        }
    }

    fn log_level(&self, settings: &WireHubSettings) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| settings.logging.level.clone())
    }

    fn json_logs(&self, settings: &WireHubSettings) -> bool {
        self.json_logs || settings.logging.json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(wirehub_settings::settings_path);
    let settings = wirehub_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    logging::init_subscriber(&args.log_level(&settings), args.json_logs(&settings));

    let mut server = WireHubServer::new(args.server_config(&settings));
    match wirehub_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics disabled"),
    }
    handlers::register(server.manager());

    let (addr, serve) = server.listen().await.context("Failed to start server")?;
    info!(
        %addr,
        settings = %settings_path.display(),
        max_connections = server.config().max_connections,
        "wirehub ready"
    );

    wirehub_server::shutdown::wait_for_signal().await;
    let dropped = server
        .shutdown()
        .drain(server.manager(), vec![serve], None)
        .await;
    info!(connections = dropped, "shutdown complete");
    Ok(())
}
