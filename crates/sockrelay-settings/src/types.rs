//! Settings types.
//!
//! All sections deserialize with `#[serde(default)]`, so a settings file only
//! needs the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and routing.
    pub server: ServerSettings,
    /// Relay loop tuning.
    pub relay: RelayTuning,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.relay.validate()
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks an ephemeral port).
    pub port: u16,
    /// WebSocket endpoint path.
    pub ws_path: String,
    /// Liveness endpoint path.
    pub health_path: String,
    /// How long graceful shutdown waits for sessions to close.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            ws_path: "/ws".to_string(),
            health_path: "/health".to_string(),
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl ServerSettings {
    fn validate(&self) -> Result<()> {
        for (key, path) in [("server.wsPath", &self.ws_path), ("server.healthPath", &self.health_path)] {
            if !path.starts_with('/') {
                return Err(SettingsError::InvalidValue(format!(
                    "{key} must start with '/', got {path:?}"
                )));
            }
        }
        if self.ws_path == self.health_path {
            return Err(SettingsError::InvalidValue(
                "server.wsPath and server.healthPath must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Relay loop tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayTuning {
    /// Coalescing window opened by the first message of a batch, in microseconds.
    pub coalesce_window_us: u64,
    /// Maximum messages per outbound frame.
    pub max_items: usize,
    /// Deadline for writing one frame, in milliseconds.
    pub write_timeout_ms: u64,
    /// Capacity of the peer → engine queue.
    pub inbound_capacity: usize,
    /// How long the reader waits for inbound queue space, in milliseconds.
    pub forward_timeout_ms: u64,
    /// How long a closing session waits for its reader, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Largest accepted inbound WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for RelayTuning {
    fn default() -> Self {
        Self {
            coalesce_window_us: 3_000,
            max_items: 128,
            write_timeout_ms: 10_000,
            inbound_capacity: 1024,
            forward_timeout_ms: 30_000,
            drain_timeout_ms: 5_000,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl RelayTuning {
    fn validate(&self) -> Result<()> {
        let checks = [
            ("relay.coalesceWindowUs", self.coalesce_window_us == 0),
            ("relay.maxItems", self.max_items == 0),
            ("relay.writeTimeoutMs", self.write_timeout_ms == 0),
            ("relay.inboundCapacity", self.inbound_capacity == 0),
            ("relay.forwardTimeoutMs", self.forward_timeout_ms == 0),
            ("relay.maxMessageSize", self.max_message_size == 0),
        ];
        match checks.iter().find(|(_, zero)| *zero) {
            Some((key, _)) => Err(SettingsError::InvalidValue(format!("{key} must be at least 1"))),
            None => Ok(()),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter. Overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_defaults() {
        let relay = RelayTuning::default();
        assert_eq!(relay.coalesce_window_us, 3_000);
        assert_eq!(relay.max_items, 128);
        assert_eq!(relay.write_timeout_ms, 10_000);
        assert_eq!(relay.inbound_capacity, 1024);
    }

    #[test]
    fn server_defaults() {
        let server = ServerSettings::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 80);
        assert_eq!(server.ws_path, "/ws");
        assert_eq!(server.health_path, "/health");
    }

    #[test]
    fn defaults_validate() {
        assert!(RelaySettings::default().validate().is_ok());
    }

    #[test]
    fn zero_max_items_rejected() {
        let mut settings = RelaySettings::default();
        settings.relay.max_items = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("relay.maxItems"));
    }

    #[test]
    fn zero_coalesce_window_rejected() {
        let mut settings = RelaySettings::default();
        settings.relay.coalesce_window_us = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn relative_ws_path_rejected() {
        let mut settings = RelaySettings::default();
        settings.server.ws_path = "ws".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("server.wsPath"));
    }

    #[test]
    fn colliding_paths_rejected() {
        let mut settings = RelaySettings::default();
        settings.server.health_path = "/ws".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn camel_case_keys() {
        let value = serde_json::to_value(RelaySettings::default()).unwrap();
        assert_eq!(value["server"]["wsPath"], "/ws");
        assert_eq!(value["relay"]["coalesceWindowUs"], 3_000);
        assert_eq!(value["relay"]["maxItems"], 128);
        assert_eq!(value["logging"]["json"], false);
    }

    #[test]
    fn partial_section_fills_defaults() {
        let settings: RelaySettings =
            serde_json::from_str(r#"{"relay": {"maxItems": 16}}"#).unwrap();
        assert_eq!(settings.relay.max_items, 16);
        assert_eq!(settings.relay.coalesce_window_us, 3_000);
        assert_eq!(settings.server.port, 80);
    }
}
