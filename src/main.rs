//! # sockrelay
//!
//! Relay server binary: loads settings, installs logging and serves the
//! WebSocket relay until Ctrl-C or SIGTERM.
//!
//! The proxy engine is external. Without one the binary wires the engine side
//! of the queues into a pass-through task that logs peer traffic; embedders
//! hand their own [`EngineHandle`] to the engine instead.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sockrelay_core::{EngineHandle, EngineQueues};
use sockrelay_server::ServerConfig;
use sockrelay_settings::RelaySettings;
use sockrelay_telemetry::TelemetryConfig;
use tracing::{debug, info};

/// WebSocket relay between a SOCKS port engine and a remote peer.
#[derive(Parser, Debug)]
#[command(name = "sockrelay", about = "WebSocket relay for a SOCKS port engine")]
struct Cli {
    /// Settings file (defaults to `~/.sockrelay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level filter, e.g. `debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    let path = cli.config.clone().unwrap_or_else(sockrelay_settings::settings_path);
    let mut settings = sockrelay_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings after CLI overrides")?;
    Ok(settings)
}

/// Drain inbound traffic and keep the outbound queue open.
async fn run_passthrough_engine(engine: EngineHandle) {
    let EngineHandle { outbound, mut inbound } = engine;
    let mut messages: u64 = 0;
    let mut bytes: u64 = 0;

    while let Some(msg) = inbound.recv().await {
        messages += 1;
        bytes += msg.data.len() as u64;
        debug!(server_id = msg.server_id, len = msg.data.len(), exit = msg.exit, port = msg.port, "inbound message");
    }

    info!(messages, bytes, "inbound queue closed, engine stopping");
    drop(outbound);
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    sockrelay_telemetry::init_telemetry(&TelemetryConfig {
        log_level: settings.logging.level.clone(),
        json: settings.logging.json,
    })
    .context("Failed to initialize logging")?;

    let EngineQueues { relay, engine } = EngineQueues::new(settings.relay.inbound_capacity);
    let engine_task = tokio::spawn(run_passthrough_engine(engine));

    let config = ServerConfig::from(&settings);
    let handle = sockrelay_server::start(config, relay)
        .await
        .context("Failed to bind server")?;

    info!("relay listening on ws://{}{}", handle.local_addr(), settings.server.ws_path);

    shutdown_signal().await?;

    info!("shutting down");
    let report = handle.shutdown().await;
    if !report.clean {
        info!(drained = report.drained, "shutdown deadline passed with sessions still open");
    }
    engine_task.abort();

    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["sockrelay"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 80);
        assert!(!settings.logging.json);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "sockrelay",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["sockrelay", "--config", "/etc/sockrelay.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/sockrelay.json")));
    }

    #[test]
    fn load_reads_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9100}}"#).unwrap();

        let cli = Cli::parse_from(["sockrelay", "--config", path.to_str().unwrap()]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.relay.max_items, 128);
    }

    #[tokio::test]
    async fn passthrough_engine_stops_when_relay_side_drops() {
        let EngineQueues { relay, engine } = EngineQueues::new(4);
        let task = tokio::spawn(run_passthrough_engine(engine));

        relay
            .forward(sockrelay_core::InboundMessage::exit(1), std::time::Duration::from_secs(1))
            .await
            .unwrap();
        drop(relay);

        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
