//! Runtime configuration derived from [`RelaySettings`].

use std::time::Duration;

use sockrelay_settings::{RelaySettings, RelayTuning};

/// Timing and sizing of the relay loop.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Window opened by the first message of a batch.
    pub coalesce_window: Duration,
    /// Maximum messages per outbound frame.
    pub max_items: usize,
    /// Deadline for writing one frame.
    pub write_timeout: Duration,
    /// How long the reader waits for inbound queue space.
    pub forward_timeout: Duration,
    /// How long a closing session waits for its reader to finish.
    pub drain_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&RelayTuning::default())
    }
}

impl From<&RelayTuning> for RelayConfig {
    fn from(tuning: &RelayTuning) -> Self {
        Self {
            coalesce_window: Duration::from_micros(tuning.coalesce_window_us),
            max_items: tuning.max_items.max(1),
            write_timeout: Duration::from_millis(tuning.write_timeout_ms),
            forward_timeout: Duration::from_millis(tuning.forward_timeout_ms),
            drain_timeout: Duration::from_millis(tuning.drain_timeout_ms),
        }
    }
}

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// WebSocket endpoint path.
    pub ws_path: String,
    /// Liveness endpoint path.
    pub health_path: String,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long graceful shutdown waits for sessions to close.
    pub shutdown_timeout: Duration,
    /// Relay loop configuration applied to every session.
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            ws_path: settings.server.ws_path.clone(),
            health_path: settings.server.health_path.clone(),
            max_message_size: settings.relay.max_message_size,
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
            relay: RelayConfig::from(&settings.relay),
        }
    }
}
